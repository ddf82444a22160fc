//! Async driver running a [`Session`] over a tokio transport.
//!
//! ```text
//! transport ─► read loop ─► Session::receive ─► events channel ─► application
//!                              ▲        │
//! StreamHandle::send_data ─────┘        └─► writer task ─► transport
//! ```
//!
//! One reader task pulls bytes off the transport and one writer task owns
//! the write half. Every session mutation wakes the writer, which serializes
//! the queued frames and writes them in the same order, so stateful header
//! compression sees frames in wire order. The reader never waits on the
//! transport's write side.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::SessionConfig;
use crate::error::{Result, StreamError, TransportError};
use crate::frame::{Headers, StatusCode, StreamId};
use crate::session::{Session, SessionEvent, SessionState, DEFAULT_PRIORITY};
use crate::stream::StreamState;

/// State shared by the connection, its tasks and stream handles.
struct Shared {
    session: Mutex<Session>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Woken after every session mutation and every completed write.
    progress: Notify,
    /// Wakes the writer task.
    outbound: Notify,
    /// Frames the writer has put on the transport.
    written: AtomicU64,
    /// Set once the writer task has exited.
    writer_done: AtomicBool,
}

impl Shared {
    /// Run `f` under the session lock and forward the events it raised.
    fn apply<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let out = {
            let mut session = self.session.lock();
            let out = f(&mut session);
            for event in session.drain_events() {
                // Receiver gone means nobody is listening
                let _ = self.events.send(event);
            }
            out
        };
        self.progress.notify_waiters();
        out
    }

    /// Like [`apply`](Self::apply), then wake the writer for whatever was queued.
    fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let out = self.apply(f);
        self.outbound.notify_one();
        out
    }

    /// Wait until `done` holds, re-checking after every session change.
    async fn wait_until(&self, mut done: impl FnMut(&Session) -> bool) {
        loop {
            let mut notified = pin!(self.progress.notified());
            notified.as_mut().enable();
            let finished = done(&*self.session.lock());
            if finished {
                return;
            }
            notified.await;
        }
    }

    /// Wait until the writer has put `frames` frames on the transport.
    async fn wait_written(&self, frames: u64) -> Result<()> {
        loop {
            let mut notified = pin!(self.progress.notified());
            notified.as_mut().enable();
            if self.written.load(Ordering::Acquire) >= frames {
                return Ok(());
            }
            if self.writer_done.load(Ordering::Acquire) {
                return Err(TransportError::SessionClosed.into());
            }
            notified.await;
        }
    }

    /// Wait for the writer task to exit.
    async fn wait_writer_done(&self) {
        loop {
            let mut notified = pin!(self.progress.notified());
            notified.as_mut().enable();
            if self.writer_done.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// A running session over an async transport.
pub struct Connection {
    shared: Arc<Shared>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Connection {
    /// Open a session over `io` and start its reader and writer tasks.
    ///
    /// Returns the connection and the receiver of every [`SessionEvent`].
    pub async fn start<T>(
        io: T,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let read_buffer_size = config.read_buffer_size;
        let (reader, writer) = tokio::io::split(io);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            session: Mutex::new(Session::new(config)),
            events: events_tx,
            progress: Notify::new(),
            outbound: Notify::new(),
            written: AtomicU64::new(0),
            writer_done: AtomicBool::new(false),
        });
        shared.with_session(|s| s.open())?;

        let writer_task = tokio::spawn(write_loop(writer, shared.clone()));
        let reader_task = tokio::spawn(read_loop(reader, shared.clone(), read_buffer_size));
        Ok((
            Self {
                shared,
                reader_task,
                writer_task,
            },
            events_rx,
        ))
    }

    pub fn state(&self) -> SessionState {
        self.shared.session.lock().state()
    }

    /// Read session state without mutating it.
    pub fn inspect<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&*self.shared.session.lock())
    }

    /// Open a stream and queue its SYN_STREAM.
    pub async fn open_stream(&self, headers: Headers, is_fin: bool) -> Result<StreamHandle> {
        self.open_stream_with_priority(headers, DEFAULT_PRIORITY, is_fin)
            .await
    }

    pub async fn open_stream_with_priority(
        &self,
        headers: Headers,
        priority: u8,
        is_fin: bool,
    ) -> Result<StreamHandle> {
        let stream_id = self
            .shared
            .with_session(|s| s.open_stream_with_priority(headers, priority, is_fin))?;
        Ok(self.stream(stream_id))
    }

    /// Handle for any stream id, e.g. one announced by [`SessionEvent::StreamOpened`].
    pub fn stream(&self, stream_id: StreamId) -> StreamHandle {
        StreamHandle {
            stream_id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Send a PING; the reply arrives as [`SessionEvent::PingReply`].
    pub async fn ping(&self) -> Result<u32> {
        self.shared.with_session(|s| s.ping())
    }

    pub async fn go_away(&self, status: StatusCode) -> Result<()> {
        self.shared.with_session(|s| s.go_away(status))
    }

    /// Resolve once no live stream remains or the session has closed.
    pub async fn wait_drained(&self) {
        self.shared
            .wait_until(|s| s.is_closed() || s.live_streams() == 0)
            .await
    }

    /// Resolve once the session has closed.
    pub async fn closed(&self) {
        self.shared.wait_until(Session::is_closed).await
    }

    /// Close the session and wait for the writer to flush the GOAWAY and
    /// shut the transport's write side down.
    ///
    /// Waits as long as the peer leaves the transport full; dropping the
    /// connection aborts both tasks instead.
    pub async fn close(&self) -> Result<()> {
        self.shared.with_session(|s| s.close());
        self.shared.wait_writer_done().await;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning handle to one stream of a [`Connection`].
#[derive(Clone)]
pub struct StreamHandle {
    stream_id: StreamId,
    shared: Weak<Shared>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

impl StreamHandle {
    pub fn id(&self) -> StreamId {
        self.stream_id
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        self.shared.upgrade().ok_or_else(|| {
            StreamError::Transport {
                stream_id: self.stream_id,
                error: TransportError::SessionClosed,
            }
            .into()
        })
    }

    /// `None` if the stream is unknown or the connection is gone.
    pub fn state(&self) -> Option<StreamState> {
        let shared = self.shared.upgrade()?;
        let state = shared.session.lock().stream_state(self.stream_id);
        state
    }

    /// Bytes received so far, leaving the buffer empty.
    pub fn take_received(&self) -> Option<Bytes> {
        let shared = self.shared.upgrade()?;
        let data = shared.with_session(|s| s.take_received(self.stream_id));
        data
    }

    /// Send data and wait until it has been written to the transport.
    ///
    /// Waits for flow control allowance when the session has none. Fails if
    /// the stream is reset before its data is queued, or if the session
    /// closes before the data is written.
    pub async fn send_data(&self, data: impl Into<Bytes>, is_fin: bool) -> Result<()> {
        let shared = self.shared()?;
        let stream_id = self.stream_id;
        let data = data.into();
        shared.with_session(|s| s.send_data(stream_id, data, is_fin))?;

        // Frames up to and including this stream's last one
        let target = loop {
            let mut notified = pin!(shared.progress.notified());
            notified.as_mut().enable();

            let (pending, reset, closed, target) = {
                let session = shared.session.lock();
                (
                    session.is_pending(stream_id),
                    session.stream(stream_id).map_or(true, |s| s.was_reset()),
                    session.is_closed(),
                    session.frames_transmitted() + session.frames_queued() as u64,
                )
            };
            if !pending {
                if reset {
                    return Err(StreamError::SendOnClosed(stream_id).into());
                }
                break target;
            }
            if closed {
                return Err(TransportError::SessionClosed.into());
            }
            notified.await;
        };
        shared.wait_written(target).await
    }

    pub async fn send_headers(&self, headers: Headers, is_fin: bool) -> Result<()> {
        let shared = self.shared()?;
        shared.with_session(|s| s.send_headers(self.stream_id, headers, is_fin))
    }

    /// Accept a peer-initiated stream.
    pub async fn reply(&self, headers: Headers, is_fin: bool) -> Result<()> {
        let shared = self.shared()?;
        shared.with_session(|s| s.reply(self.stream_id, headers, is_fin))
    }

    /// Reset the stream with `status`.
    pub async fn close(&self, status: StatusCode) -> Result<()> {
        let shared = self.shared()?;
        shared.with_session(|s| s.close_stream(self.stream_id, status))
    }

    /// Resolve once the stream is closed or gone.
    pub async fn closed(&self) {
        let Ok(shared) = self.shared() else {
            return;
        };
        let stream_id = self.stream_id;
        shared
            .wait_until(|s| {
                s.is_closed() || s.stream(stream_id).map_or(true, |st| st.is_closed())
            })
            .await
    }
}

/// Main read loop: feeds transport bytes into the session.
async fn read_loop<R>(mut reader: R, shared: Arc<Shared>, buffer_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Transport closed by peer");
                shared.with_session(|s| s.transport_closed(TransportError::ConnectionClosed));
                break;
            }
            Ok(n) => n,
            Err(e) => {
                error!("Read loop error: {}", e);
                shared.with_session(|s| s.transport_closed(e.into()));
                break;
            }
        };

        // Echoes, resets, grants and unblocked data are left to the writer
        let received = shared.with_session(|s| s.receive(&buf[..n]));
        if let Err(e) = received {
            error!("Session ended: {}", e);
            break;
        }
        let closed = shared.session.lock().is_closed();
        if closed {
            debug!("Session closed, stopping read loop");
            break;
        }
    }
}

/// Main writer loop: owns the write half until the session is done with it.
async fn write_loop<W>(mut writer: W, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    match write_frames(&mut writer, &shared).await {
        Ok(()) => {
            if let Err(e) = writer.shutdown().await {
                debug!("Writer shutdown failed: {}", e);
            }
        }
        Err(e) => {
            error!("Write failed: {}", e);
            shared.apply(|s| s.transport_closed(e.into()));
        }
    }
    shared.writer_done.store(true, Ordering::Release);
    shared.progress.notify_waiters();
}

/// Serialize and write queued frames each time the writer is woken.
///
/// Returns once the session has closed and its final frames are written.
async fn write_frames<W>(writer: &mut W, shared: &Shared) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let (bytes, transmitted, closed) = shared.apply(|s| {
            let bytes = match s.transmit() {
                Ok(bytes) => bytes,
                Err(e) => {
                    // The session closed and queued a GOAWAY in its place
                    error!("Transmit failed: {}", e);
                    s.transmit().unwrap_or_default()
                }
            };
            (bytes, s.frames_transmitted(), s.is_closed())
        });

        if !bytes.is_empty() {
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }
        shared.written.store(transmitted, Ordering::Release);
        shared.progress.notify_waiters();

        if closed {
            return Ok(());
        }
        shared.outbound.notified().await;
    }
}
