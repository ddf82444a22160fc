//! Stream state tracking.

use bytes::{Bytes, BytesMut};

use crate::frame::{Headers, StreamId};

/// Stream lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Allocated but no SYN_STREAM exchanged yet.
    Idle,
    /// Both directions open.
    Open,
    /// We sent FIN.
    HalfClosedLocal,
    /// Peer sent FIN.
    HalfClosedRemote,
    Closed,
}

/// One logical request/response exchange.
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    state: StreamState,
    /// Opened by this endpoint.
    local: bool,
    priority: u8,
    /// Headers from SYN_STREAM, merged with any later HEADERS/SYN_REPLY.
    headers: Headers,
    received: BytesMut,
    /// A FIN is waiting in the pending-send queue.
    fin_queued: bool,
    replied: bool,
    /// Closed abnormally rather than by FIN in both directions.
    was_reset: bool,
}

impl Stream {
    pub fn new(id: StreamId, local: bool, priority: u8) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            local,
            priority,
            headers: Headers::new(),
            received: BytesMut::new(),
            fin_queued: false,
            replied: false,
            was_reset: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// All data received so far.
    pub fn received_data(&self) -> &[u8] {
        &self.received
    }

    /// Take the received bytes, leaving the buffer empty.
    pub fn take_received(&mut self) -> Bytes {
        self.received.split().freeze()
    }

    pub fn was_reset(&self) -> bool {
        self.was_reset
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Check if the stream is open for sending.
    pub fn can_send(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if the stream is open for receiving.
    pub fn can_recv(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Whether new data may still be queued (no FIN sent or queued).
    pub fn can_queue(&self) -> bool {
        self.can_send() && !self.fin_queued
    }

    pub fn fin_queued(&self) -> bool {
        self.fin_queued
    }

    pub(crate) fn queue_fin(&mut self) {
        self.fin_queued = true;
    }

    /// SYN_STREAM sent or received.
    pub fn open(&mut self, headers: Headers) {
        if self.state == StreamState::Idle {
            self.state = StreamState::Open;
        }
        self.headers.extend(headers);
    }

    /// Record a SYN_REPLY. Returns false for a second reply.
    pub fn reply(&mut self) -> bool {
        !std::mem::replace(&mut self.replied, true)
    }

    /// Merge headers from HEADERS or SYN_REPLY.
    pub fn merge_headers(&mut self, headers: &Headers) {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
    }

    pub fn recv_data(&mut self, data: &[u8]) {
        self.received.extend_from_slice(data);
    }

    /// Record that we sent FIN.
    pub fn send_end_stream(&mut self) {
        self.fin_queued = true;
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Record that we received FIN.
    pub fn recv_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// Mark the stream as reset. Returns false if it was already closed.
    pub fn reset(&mut self) -> bool {
        if self.state == StreamState::Closed {
            return false;
        }
        self.state = StreamState::Closed;
        self.was_reset = true;
        true
    }
}
