//! Sans-I/O session: stream multiplexing over one transport.
//!
//! Feed transport bytes in with [`Session::receive`], take the bytes to write
//! out with [`Session::transmit`] and collect what happened with
//! [`Session::drain_events`]. The session never touches a socket itself;
//! [`Connection`](crate::Connection) drives one over tokio I/O.
//!
//! # Example
//!
//! ```rust
//! use sm_http2::{headers, Session, SessionConfig, SessionEvent};
//!
//! let mut client = Session::new(SessionConfig::client());
//! let mut server = Session::new(SessionConfig::server());
//! client.open().unwrap();
//! server.open().unwrap();
//!
//! let id = client.open_stream(headers([(":path", "/a.txt")]), true).unwrap();
//! server.receive(&client.transmit().unwrap()).unwrap();
//!
//! let opened = server.drain_events().into_iter().any(|e| {
//!     matches!(e, SessionEvent::StreamOpened { stream_id, .. } if stream_id == id)
//! });
//! assert!(opened);
//! ```

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tracing::{debug, error, trace, warn};

use crate::codec::FrameCodec;
use crate::config::{Role, SessionConfig};
use crate::error::{
    Error, FramingError, ProtocolError, Result, SessionError, StreamError, TransportError,
};
use crate::flow_control::{FlowControl, FlowControlScheme};
use crate::frame::{
    flags, frame_type, settings_id, Frame, FrameBody, Headers, SettingsMap, StatusCode, StreamId,
    STREAM_ID_MASK,
};
use crate::stream::{Stream, StreamState};

/// Priority byte used by [`Session::open_stream`].
pub const DEFAULT_PRIORITY: u8 = 3;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Opened,
    Closed,
}

/// Events raised by a [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session accepted [`Session::open`].
    Opened,
    /// A session-level error. Fatal errors are followed by [`Closed`](Self::Closed).
    Error(SessionError),
    /// The peer opened a stream.
    StreamOpened {
        stream_id: StreamId,
        headers: Headers,
        is_fin: bool,
    },
    /// SYN_REPLY or HEADERS arrived on a stream.
    Headers {
        stream_id: StreamId,
        headers: Headers,
        is_fin: bool,
    },
    Data {
        stream_id: StreamId,
        data: Bytes,
        is_fin: bool,
    },
    /// The peer reset a stream.
    Reset {
        stream_id: StreamId,
        status: StatusCode,
    },
    StreamClosed {
        stream_id: StreamId,
    },
    /// A non-fatal error scoped to one stream.
    StreamError(StreamError),
    /// The peer sent SETTINGS.
    Settings(SettingsMap),
    /// Answer to [`Session::ping`].
    PingReply {
        id: u32,
    },
    GoAway {
        last_good_stream_id: StreamId,
        status: StatusCode,
    },
    /// Send allowance became available after a send was blocked.
    SendNext,
    Closed,
}

/// A send waiting for flow control allowance.
#[derive(Debug)]
enum Pending {
    Data {
        stream_id: StreamId,
        data: Bytes,
        fin: bool,
    },
    /// Control frame queued behind data on the same stream.
    Frame(Frame),
}

impl Pending {
    fn stream_id(&self) -> StreamId {
        match self {
            Pending::Data { stream_id, .. } => *stream_id,
            Pending::Frame(frame) => frame.stream_id,
        }
    }
}

/// One endpoint of a multiplexed connection.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: SessionState,
    codec: FrameCodec,
    streams: HashMap<StreamId, Stream>,
    next_stream_id: StreamId,
    next_ping_id: u32,
    /// Highest stream id the peer opened
    last_peer_stream_id: StreamId,
    flow: FlowControl,
    /// Settings received from the peer
    settings: SettingsMap,
    /// Frames ready for serialization
    outbound: VecDeque<Frame>,
    /// Frames serialized by `transmit` so far
    transmitted: u64,
    /// Data waiting for send allowance, FIFO across the session
    pending: VecDeque<Pending>,
    events: Vec<SessionEvent>,
    go_away_sent: bool,
    go_away_received: Option<StreamId>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let mut codec = FrameCodec::with_pipeline(config.version, config.build_pipeline());
        codec.set_max_frame_payload(config.max_frame_payload);
        let first_id = config.role.first_stream_id();
        Self {
            state: SessionState::Connecting,
            codec,
            streams: HashMap::new(),
            next_stream_id: first_id,
            next_ping_id: first_id,
            last_peer_stream_id: 0,
            flow: FlowControl::from_config(&config),
            settings: SettingsMap::new(),
            outbound: VecDeque::new(),
            transmitted: 0,
            pending: VecDeque::new(),
            events: Vec::new(),
            go_away_sent: false,
            go_away_received: None,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn flow_control(&self) -> &FlowControl {
        &self.flow
    }

    /// Settings the peer has sent so far.
    pub fn peer_settings(&self) -> &SettingsMap {
        &self.settings
    }

    pub fn stream(&self, stream_id: StreamId) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }

    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.streams.get(&stream_id).map(Stream::state)
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    /// Streams that are not yet closed.
    pub fn live_streams(&self) -> usize {
        self.streams.values().filter(|s| !s.is_closed()).count()
    }

    /// Take the data accumulated on a stream.
    pub fn take_received(&mut self, stream_id: StreamId) -> Option<Bytes> {
        self.streams.get_mut(&stream_id).map(Stream::take_received)
    }

    /// Forget a stream (e.g., after its owner read the final state).
    pub fn remove_stream(&mut self, stream_id: StreamId) -> Option<Stream> {
        self.streams.remove(&stream_id)
    }

    /// Whether any stream has data waiting for allowance.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Whether `stream_id` has anything waiting in the pending-send queue.
    pub fn is_pending(&self, stream_id: StreamId) -> bool {
        self.pending.iter().any(|p| p.stream_id() == stream_id)
    }

    /// Data bytes of `stream_id` not yet handed to [`transmit`](Self::transmit).
    pub fn pending_bytes(&self, stream_id: StreamId) -> usize {
        self.pending
            .iter()
            .map(|p| match p {
                Pending::Data {
                    stream_id: id,
                    data,
                    ..
                } if *id == stream_id => data.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Number of frames [`transmit`](Self::transmit) has serialized.
    pub fn frames_transmitted(&self) -> u64 {
        self.transmitted
    }

    /// Number of frames queued for the next [`transmit`](Self::transmit).
    pub fn frames_queued(&self) -> usize {
        self.outbound.len()
    }

    /// Take every event raised since the last call.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Move from Connecting to Opened.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            SessionState::Opened => return Ok(()),
            SessionState::Closed => return Err(TransportError::SessionClosed.into()),
            SessionState::Connecting => {}
        }
        self.state = SessionState::Opened;
        debug!(role = ?self.config.role, scheme = self.flow.scheme().name(), "session opened");
        self.events.push(SessionEvent::Opened);

        if !self.config.initial_settings.is_empty() {
            self.outbound
                .push_back(Frame::settings(self.config.initial_settings.clone()));
        }
        if self.flow.scheme() == FlowControlScheme::Credit && self.config.receive_credit > 0 {
            let grant = self.flow.grant(self.config.receive_credit);
            self.outbound.push_back(grant);
        }
        Ok(())
    }

    /// Open a stream with [`DEFAULT_PRIORITY`].
    pub fn open_stream(&mut self, headers: Headers, is_fin: bool) -> Result<StreamId> {
        self.open_stream_with_priority(headers, DEFAULT_PRIORITY, is_fin)
    }

    pub fn open_stream_with_priority(
        &mut self,
        headers: Headers,
        priority: u8,
        is_fin: bool,
    ) -> Result<StreamId> {
        self.ensure_open()?;
        if self.go_away_sent || self.go_away_received.is_some() {
            return Err(Error::GoingAway);
        }

        let stream_id = self.next_stream_id;
        if stream_id > STREAM_ID_MASK {
            return Err(Error::StreamIdsExhausted);
        }
        // Ids stay below 2^31 + 2, so this cannot overflow
        self.next_stream_id += 2;

        let mut stream = Stream::new(stream_id, true, priority);
        stream.open(headers.clone());
        self.streams.insert(stream_id, stream);
        debug!(stream_id, priority, is_fin, "opening stream");

        self.emit(Frame::syn_stream(stream_id, priority, headers, is_fin));
        Ok(stream_id)
    }

    /// Accept a peer-initiated stream with SYN_REPLY.
    pub fn reply(&mut self, stream_id: StreamId, headers: Headers, is_fin: bool) -> Result<()> {
        self.ensure_open()?;
        let stream = self.sendable_stream(stream_id)?;
        if stream.is_local() || !stream.reply() {
            return Err(ProtocolError::DuplicateReply(stream_id).into());
        }
        stream.merge_headers(&headers);
        if is_fin {
            stream.queue_fin();
        }
        self.send_control(Frame::syn_reply(stream_id, headers, is_fin));
        Ok(())
    }

    /// Send a HEADERS frame on an open stream.
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        headers: Headers,
        is_fin: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let stream = self.sendable_stream(stream_id)?;
        if is_fin {
            stream.queue_fin();
        }
        self.send_control(Frame::headers(stream_id, headers, is_fin));
        Ok(())
    }

    /// Queue data on a stream.
    ///
    /// Data goes out as soon as allowance permits, split into frames of at
    /// most `max_data_frame_size`. A zero-length FIN always goes out.
    pub fn send_data(
        &mut self,
        stream_id: StreamId,
        data: impl Into<Bytes>,
        is_fin: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let stream = self.sendable_stream(stream_id)?;
        let data = data.into();
        if data.is_empty() && !is_fin {
            return Ok(());
        }
        if is_fin {
            stream.queue_fin();
        }
        trace!(stream_id, len = data.len(), is_fin, "queueing data");
        self.pending.push_back(Pending::Data {
            stream_id,
            data,
            fin: is_fin,
        });
        self.flush_pending();
        Ok(())
    }

    /// Reset a stream locally.
    ///
    /// Closing an already closed stream is [`StreamError::AlreadyClosed`].
    pub fn close_stream(&mut self, stream_id: StreamId, status: StatusCode) -> Result<()> {
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(StreamError::Unknown(stream_id))?;
        if !stream.reset() {
            return Err(StreamError::AlreadyClosed(stream_id).into());
        }
        debug!(stream_id, %status, "resetting stream");
        self.drop_pending(stream_id);
        self.outbound.push_back(Frame::rst(stream_id, status));
        self.events.push(SessionEvent::StreamClosed { stream_id });
        self.check_drained();
        Ok(())
    }

    /// Send a PING. The matching [`SessionEvent::PingReply`] carries the
    /// returned id.
    pub fn ping(&mut self) -> Result<u32> {
        self.ensure_open()?;
        let id = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(2) & STREAM_ID_MASK;
        self.outbound.push_back(Frame::ping(id));
        Ok(id)
    }

    /// Stop accepting peer streams. The session closes once every live
    /// stream has finished.
    pub fn go_away(&mut self, status: StatusCode) -> Result<()> {
        self.ensure_open()?;
        if !self.go_away_sent {
            debug!(last_good = self.last_peer_stream_id, %status, "sending GOAWAY");
            self.go_away_sent = true;
            self.outbound
                .push_back(Frame::go_away(self.last_peer_stream_id, status));
        }
        self.check_drained();
        Ok(())
    }

    /// Cancel every live stream, send GOAWAY and close.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        debug!(live = self.live_streams(), "closing session");
        self.abort_streams(TransportError::SessionClosed);
        if self.state == SessionState::Opened && !self.go_away_sent {
            self.go_away_sent = true;
            self.outbound
                .push_back(Frame::go_away(self.last_peer_stream_id, StatusCode::Success));
        }
        self.state = SessionState::Closed;
        self.events.push(SessionEvent::Closed);
    }

    /// The transport went away.
    pub fn transport_closed(&mut self, error: TransportError) {
        if self.state == SessionState::Closed {
            return;
        }
        debug!(%error, "transport closed");
        self.abort_streams(error.clone());
        self.outbound.clear();
        self.state = SessionState::Closed;
        self.events.push(SessionEvent::Error(error.into()));
        self.events.push(SessionEvent::Closed);
    }

    /// Serialize every queued frame.
    ///
    /// Frames are serialized in queue order so stateful header compression
    /// matches the order on the wire. A serialization failure is fatal: the
    /// session closes and queues GOAWAY(ProtocolError), which the next call
    /// returns.
    pub fn transmit(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(frame) = self.outbound.pop_front() {
            match self.codec.serialize(&frame) {
                Ok(bytes) => {
                    trace!(frame_type = %frame.frame_type(), stream_id = frame.stream_id, len = bytes.len(), "frame out");
                    out.extend_from_slice(&bytes);
                    self.transmitted += 1;
                }
                Err(err) => {
                    error!(%err, frame_type = %frame.frame_type(), "failed to serialize frame");
                    self.fail(err.clone());
                    return Err(err.into());
                }
            }
        }
        Ok(out)
    }

    /// Process bytes read from the transport.
    ///
    /// Recoverable framing and protocol errors become events. A fatal
    /// framing error closes the session and is returned.
    pub fn receive(&mut self, data: &[u8]) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(TransportError::SessionClosed.into());
        }
        self.codec.feed(data);

        while self.state != SessionState::Closed {
            match self.codec.decode_next() {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => break,
                Err(err) if err.is_fatal() => {
                    error!(%err, "fatal framing error");
                    self.fail(err.clone());
                    return Err(err.into());
                }
                Err(err) => self.on_framing_error(err),
            }
        }

        if self.config.auto_replenish && self.state != SessionState::Closed {
            if let Some(grant) = self.flow.take_replenish() {
                trace!("replenishing peer allowance");
                self.outbound.push_back(grant);
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) {
        trace!(frame_type = %frame.frame_type(), stream_id = frame.stream_id, flags = frame.flags, "frame in");
        let stream_id = frame.stream_id;
        let is_fin = frame.is_fin();
        match frame.body {
            FrameBody::Data(data) => self.on_data(stream_id, data, is_fin),
            FrameBody::SynStream {
                priority, headers, ..
            } => self.on_syn_stream(stream_id, priority, headers, frame.flags),
            FrameBody::SynReply { headers } => self.on_reply(stream_id, headers, is_fin),
            FrameBody::Headers { headers } => self.on_headers(stream_id, headers, is_fin),
            FrameBody::Rst { status_code } => self.on_rst(stream_id, status_code),
            FrameBody::Settings { entries, .. } => self.on_settings(entries),
            FrameBody::Ping { .. } => self.on_ping(stream_id),
            FrameBody::GoAway {
                last_good_stream_id,
                status_code,
            } => self.on_go_away(last_good_stream_id, status_code),
            FrameBody::WindowUpdate {
                delta_window_size, ..
            } => {
                let result = self.flow.on_window_update(delta_window_size);
                self.on_allowance(result);
            }
            FrameBody::CreditUpdate {
                credit_addition, ..
            } => {
                let result = self.flow.on_credit_update(credit_addition);
                self.on_allowance(result);
            }
        }
    }

    fn on_syn_stream(
        &mut self,
        stream_id: StreamId,
        priority: u8,
        headers: Headers,
        frame_flags: u8,
    ) {
        let violation = if stream_id == 0 {
            Some(ProtocolError::ZeroStreamId)
        } else if !self.config.role.peer().owns(stream_id) {
            Some(ProtocolError::WrongParity { stream_id })
        } else if stream_id <= self.last_peer_stream_id {
            Some(ProtocolError::StreamIdNotIncreasing {
                stream_id,
                last: self.last_peer_stream_id,
            })
        } else {
            None
        };
        if let Some(err) = violation {
            warn!(stream_id, %err, "rejecting SYN_STREAM");
            if stream_id != 0 {
                self.outbound
                    .push_back(Frame::rst(stream_id, StatusCode::ProtocolError));
            }
            self.events.push(SessionEvent::Error(err.into()));
            return;
        }

        self.last_peer_stream_id = stream_id;
        if self.go_away_sent {
            debug!(stream_id, "refusing stream after GOAWAY");
            self.outbound
                .push_back(Frame::rst(stream_id, StatusCode::RefusedStream));
            return;
        }

        let is_fin = frame_flags & flags::FIN != 0;
        let mut stream = Stream::new(stream_id, false, priority);
        stream.open(headers.clone());
        if frame_flags & flags::UNIDIRECTIONAL != 0 {
            // Nothing will be sent on a unidirectional stream
            stream.send_end_stream();
        }
        if is_fin {
            stream.recv_end_stream();
        }
        let closed = stream.is_closed();
        self.streams.insert(stream_id, stream);
        debug!(stream_id, priority, is_fin, "peer opened stream");
        self.events.push(SessionEvent::StreamOpened {
            stream_id,
            headers,
            is_fin,
        });
        if closed {
            self.events.push(SessionEvent::StreamClosed { stream_id });
            self.check_drained();
        }
    }

    fn on_reply(&mut self, stream_id: StreamId, headers: Headers, is_fin: bool) {
        let Some(stream) = self.receiving_stream(stream_id) else {
            return;
        };
        if !stream.is_local() || !stream.reply() {
            self.fail_stream(
                stream_id,
                ProtocolError::DuplicateReply(stream_id),
                StatusCode::StreamInUse,
            );
            return;
        }
        stream.merge_headers(&headers);
        self.events.push(SessionEvent::Headers {
            stream_id,
            headers,
            is_fin,
        });
        if is_fin {
            self.recv_fin(stream_id);
        }
    }

    fn on_headers(&mut self, stream_id: StreamId, headers: Headers, is_fin: bool) {
        let Some(stream) = self.receiving_stream(stream_id) else {
            return;
        };
        stream.merge_headers(&headers);
        self.events.push(SessionEvent::Headers {
            stream_id,
            headers,
            is_fin,
        });
        if is_fin {
            self.recv_fin(stream_id);
        }
    }

    fn on_data(&mut self, stream_id: StreamId, data: Bytes, is_fin: bool) {
        if let Err(err) = self.flow.recv_data(stream_id, data.len()) {
            warn!(stream_id, %err, "flow control violation");
            self.fail_stream(stream_id, err, StatusCode::FlowControlError);
            return;
        }
        let Some(stream) = self.receiving_stream(stream_id) else {
            return;
        };
        stream.recv_data(&data);
        self.events.push(SessionEvent::Data {
            stream_id,
            data,
            is_fin,
        });
        if is_fin {
            self.recv_fin(stream_id);
        }
    }

    fn on_rst(&mut self, stream_id: StreamId, status: StatusCode) {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            warn!(stream_id, "RST_STREAM for unknown stream");
            self.events.push(SessionEvent::Error(
                ProtocolError::UnknownStream(stream_id).into(),
            ));
            return;
        };
        if !stream.reset() {
            debug!(stream_id, "RST_STREAM on closed stream");
            self.events
                .push(SessionEvent::StreamError(StreamError::AlreadyClosed(stream_id)));
            return;
        }
        debug!(stream_id, %status, "stream reset by peer");
        self.drop_pending(stream_id);
        self.events.push(SessionEvent::Reset { stream_id, status });
        self.events.push(SessionEvent::StreamClosed { stream_id });
        self.check_drained();
    }

    fn on_settings(&mut self, entries: SettingsMap) {
        let mut unblocked = false;
        for (&id, &value) in &entries {
            self.settings.insert(id, value);
            if id == settings_id::INITIAL_WINDOW_SIZE {
                unblocked |= self.flow.on_initial_window_size(i64::from(value));
            }
        }
        debug!(count = entries.len(), "peer settings");
        self.events.push(SessionEvent::Settings(entries));
        self.flush_pending();
        if unblocked {
            self.events.push(SessionEvent::SendNext);
        }
    }

    fn on_ping(&mut self, id: u32) {
        if self.config.role.owns(id) {
            self.events.push(SessionEvent::PingReply { id });
        } else {
            trace!(id, "echoing PING");
            self.outbound.push_back(Frame::ping(id));
        }
    }

    fn on_go_away(&mut self, last_good_stream_id: StreamId, status: StatusCode) {
        debug!(last_good_stream_id, %status, "peer sent GOAWAY");
        self.go_away_received = Some(last_good_stream_id);
        self.events.push(SessionEvent::GoAway {
            last_good_stream_id,
            status,
        });

        let mut refused: Vec<StreamId> = self
            .streams
            .values()
            .filter(|s| s.is_local() && s.id() > last_good_stream_id && !s.is_closed())
            .map(Stream::id)
            .collect();
        refused.sort_unstable();
        for stream_id in refused {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.reset();
            }
            self.drop_pending(stream_id);
            self.events.push(SessionEvent::StreamError(StreamError::Refused {
                stream_id,
                last_good_stream_id,
            }));
            self.events.push(SessionEvent::StreamClosed { stream_id });
        }
        self.check_drained();
    }

    fn on_allowance(&mut self, result: std::result::Result<bool, ProtocolError>) {
        match result {
            Ok(unblocked) => {
                self.flush_pending();
                if unblocked {
                    self.events.push(SessionEvent::SendNext);
                }
            }
            Err(err) => {
                warn!(%err, "invalid flow control update");
                self.events.push(SessionEvent::Error(err.into()));
            }
        }
    }

    /// Attribute a non-fatal decode failure to its stream where one exists.
    fn on_framing_error(&mut self, err: FramingError) {
        warn!(%err, "dropping undecodable frame");
        let Some(header) = self.codec.failed_header().cloned() else {
            self.events.push(SessionEvent::Error(err.into()));
            return;
        };
        let stream_id = header.stream_id;
        let live = self.streams.get(&stream_id).map_or(false, |s| !s.is_closed());

        if header.is_control && live && header.frame_type != frame_type::PING {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.reset();
            }
            self.drop_pending(stream_id);
            self.outbound
                .push_back(Frame::rst(stream_id, StatusCode::ProtocolError));
            self.events
                .push(SessionEvent::StreamError(StreamError::Framing { stream_id, error: err }));
            self.events.push(SessionEvent::StreamClosed { stream_id });
            self.check_drained();
        } else if header.is_control
            && header.frame_type == frame_type::SYN_STREAM
            && self.config.role.peer().owns(stream_id)
            && stream_id > self.last_peer_stream_id
        {
            // The peer is waiting on a stream that never made it into the table
            self.last_peer_stream_id = stream_id;
            self.outbound
                .push_back(Frame::rst(stream_id, StatusCode::ProtocolError));
            self.events.push(SessionEvent::Error(err.into()));
        } else {
            self.events.push(SessionEvent::Error(err.into()));
        }
    }

    /// Stream a peer frame may land on, or `None` after reporting why not.
    fn receiving_stream(&mut self, stream_id: StreamId) -> Option<&mut Stream> {
        let state = match self.streams.get(&stream_id) {
            Some(stream) => stream.state(),
            None => {
                warn!(stream_id, "frame for unknown stream");
                if stream_id != 0 {
                    self.outbound
                        .push_back(Frame::rst(stream_id, StatusCode::InvalidStream));
                }
                self.events.push(SessionEvent::Error(
                    ProtocolError::UnknownStream(stream_id).into(),
                ));
                return None;
            }
        };
        match state {
            StreamState::Open | StreamState::HalfClosedLocal => self.streams.get_mut(&stream_id),
            StreamState::Closed => {
                debug!(stream_id, "frame for closed stream");
                self.events.push(SessionEvent::StreamError(StreamError::Protocol {
                    stream_id,
                    error: ProtocolError::StreamClosed(stream_id),
                }));
                None
            }
            StreamState::Idle | StreamState::HalfClosedRemote => {
                self.fail_stream(
                    stream_id,
                    ProtocolError::StreamClosed(stream_id),
                    StatusCode::StreamAlreadyClosed,
                );
                None
            }
        }
    }

    /// Reset a live stream over a protocol violation.
    fn fail_stream(&mut self, stream_id: StreamId, error: ProtocolError, status: StatusCode) {
        let reset = self
            .streams
            .get_mut(&stream_id)
            .map_or(false, Stream::reset);
        if !reset {
            self.events.push(SessionEvent::Error(error.into()));
            return;
        }
        self.drop_pending(stream_id);
        self.outbound.push_back(Frame::rst(stream_id, status));
        self.events
            .push(SessionEvent::StreamError(StreamError::Protocol { stream_id, error }));
        self.events.push(SessionEvent::StreamClosed { stream_id });
        self.check_drained();
    }

    fn recv_fin(&mut self, stream_id: StreamId) {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return;
        };
        stream.recv_end_stream();
        if stream.is_closed() {
            self.events.push(SessionEvent::StreamClosed { stream_id });
            self.check_drained();
        }
    }

    /// Send a control frame, keeping it behind data already queued on the
    /// same stream.
    fn send_control(&mut self, frame: Frame) {
        let stream_id = frame.stream_id;
        if self.is_pending(stream_id) {
            self.pending.push_back(Pending::Frame(frame));
        } else {
            self.emit(frame);
        }
    }

    /// Queue a frame for transmit, applying a FIN to the stream state.
    fn emit(&mut self, frame: Frame) {
        if frame.is_fin() {
            if let Some(stream) = self.streams.get_mut(&frame.stream_id) {
                let was_closed = stream.is_closed();
                stream.send_end_stream();
                if !was_closed && stream.is_closed() {
                    self.events.push(SessionEvent::StreamClosed {
                        stream_id: frame.stream_id,
                    });
                }
            }
        }
        self.outbound.push_back(frame);
        self.check_drained();
    }

    /// Move queued data out as far as the allowance reaches.
    fn flush_pending(&mut self) {
        while let Some(entry) = self.pending.pop_front() {
            match entry {
                Pending::Frame(frame) => self.emit(frame),
                Pending::Data {
                    stream_id,
                    mut data,
                    fin,
                } => {
                    if data.is_empty() {
                        self.emit(Frame::data(stream_id, data, fin));
                        continue;
                    }
                    let n = self
                        .flow
                        .sendable(data.len())
                        .min(self.config.max_data_frame_size);
                    if n == 0 {
                        trace!(stream_id, waiting = data.len(), "send blocked on flow control");
                        self.pending.push_front(Pending::Data {
                            stream_id,
                            data,
                            fin,
                        });
                        self.flow.mark_blocked();
                        break;
                    }
                    let chunk = data.split_to(n);
                    let last = data.is_empty();
                    self.flow.consume_send(n);
                    self.emit(Frame::data(stream_id, chunk, fin && last));
                    if !last {
                        self.pending.push_front(Pending::Data {
                            stream_id,
                            data,
                            fin,
                        });
                    }
                }
            }
        }
    }

    fn drop_pending(&mut self, stream_id: StreamId) {
        self.pending.retain(|p| p.stream_id() != stream_id);
    }

    /// Force-close every live stream with a transport error.
    fn abort_streams(&mut self, error: TransportError) {
        let mut live: Vec<StreamId> = self
            .streams
            .values()
            .filter(|s| !s.is_closed())
            .map(Stream::id)
            .collect();
        live.sort_unstable();
        for stream_id in live {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.reset();
            }
            self.events.push(SessionEvent::StreamError(StreamError::Transport {
                stream_id,
                error: error.clone(),
            }));
            self.events.push(SessionEvent::StreamClosed { stream_id });
        }
        self.pending.clear();
    }

    /// Tear the session down after a fatal framing error.
    fn fail(&mut self, err: FramingError) {
        if self.state == SessionState::Closed {
            return;
        }
        self.abort_streams(TransportError::Framing(err.to_string()));
        self.outbound.clear();
        if self.state == SessionState::Opened {
            self.outbound.push_back(Frame::go_away(
                self.last_peer_stream_id,
                StatusCode::ProtocolError,
            ));
        }
        self.state = SessionState::Closed;
        self.events.push(SessionEvent::Error(err.into()));
        self.events.push(SessionEvent::Closed);
    }

    /// Close once a GOAWAY was exchanged and no live stream remains.
    fn check_drained(&mut self) {
        let going_away = self.go_away_sent || self.go_away_received.is_some();
        if self.state == SessionState::Opened && going_away && self.live_streams() == 0 {
            debug!("session drained after GOAWAY");
            self.state = SessionState::Closed;
            self.events.push(SessionEvent::Closed);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Opened => Ok(()),
            SessionState::Connecting => Err(Error::NotOpen),
            SessionState::Closed => Err(TransportError::SessionClosed.into()),
        }
    }

    /// Stream that still accepts outbound frames.
    fn sendable_stream(&mut self, stream_id: StreamId) -> Result<&mut Stream> {
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(StreamError::Unknown(stream_id))?;
        if !stream.can_queue() {
            return Err(StreamError::SendOnClosed(stream_id).into());
        }
        Ok(stream)
    }
}
