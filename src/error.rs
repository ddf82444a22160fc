//! Error types for the session protocol.
//!
//! The taxonomy follows where an error is surfaced:
//!
//! - [`FramingError`]: bytes that do not form a valid frame
//! - [`ProcessingError`]: a pipeline transform failed (always fatal)
//! - [`ProtocolError`]: a well-formed frame that breaks session rules
//! - [`StreamError`]: scoped to one stream, siblings are unaffected
//! - [`TransportError`]: the byte stream itself is gone
//!
//! Errors carried inside [`SessionEvent`](crate::SessionEvent)s are
//! `Clone + PartialEq` so events can be fanned out and asserted on.

use thiserror::Error;

use crate::frame::StatusCode;

/// Malformed, truncated or otherwise undecodable frame bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Fewer bytes than a field (or the declared length) requires.
    #[error("truncated {context}: need {needed} bytes, have {available}")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// Declared payload length disagrees with the bytes supplied.
    #[error("length mismatch: header declares {declared} bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Bytes left over after a fixed-layout payload was fully parsed.
    #[error("{frame_type} payload has {extra} trailing bytes")]
    TrailingBytes {
        frame_type: &'static str,
        extra: usize,
    },

    /// Control frame type code not known to this protocol.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u16),

    /// Control frame carrying a version this endpoint does not speak.
    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion { expected: u16, found: u16 },

    /// A header name appeared twice in one header block.
    #[error("duplicate header name {0:?}")]
    DuplicateHeader(String),

    /// A count or length field in a header block was negative.
    #[error("negative {0} in header block")]
    NegativeLength(&'static str),

    /// Header name or value was not UTF-8.
    #[error("header {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// Header block larger than [`MAX_HEADER_BLOCK_SIZE`](crate::codec::MAX_HEADER_BLOCK_SIZE).
    #[error("header block too large ({size} bytes, max {max})")]
    HeaderBlockTooLarge { size: usize, max: usize },

    /// Payload does not fit the 24-bit length field or the configured ceiling.
    #[error("frame payload {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A message processor failed while transforming the frame.
    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

impl FramingError {
    /// Whether the session can keep reading after this error.
    ///
    /// Pipeline failures leave compressor state out of sync with the peer, and
    /// an oversize declared length cannot be skipped without buffering it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FramingError::Processing(_) | FramingError::FrameTooLarge { .. })
    }
}

/// A message processor could not transform its byte range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    #[error("header compression failed: {0}")]
    Compression(String),

    #[error("header decompression failed: {0}")]
    Decompression(String),

    #[error("processor {name} rejected input: {reason}")]
    Rejected { name: &'static str, reason: String },
}

/// A well-formed frame that violates session rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("stream id {stream_id} has wrong parity for a peer-initiated stream")]
    WrongParity { stream_id: u32 },

    #[error("stream id {stream_id} is not above last peer stream id {last}")]
    StreamIdNotIncreasing { stream_id: u32, last: u32 },

    #[error("stream id 0 is reserved for session-level frames")]
    ZeroStreamId,

    #[error("frame references unknown stream {0}")]
    UnknownStream(u32),

    #[error("frame references closed stream {0}")]
    StreamClosed(u32),

    #[error("stream {0} already received a reply")]
    DuplicateReply(u32),

    #[error("flow control violated on stream {stream_id}: {received} bytes over allowance {allowance}")]
    FlowControl {
        stream_id: u32,
        received: usize,
        allowance: i64,
    },

    #[error("negative credit addition {0}")]
    NegativeCredit(i64),

    #[error("{frame} is not valid under the {scheme} flow control scheme")]
    SchemeMismatch {
        frame: &'static str,
        scheme: &'static str,
    },
}

/// An error scoped to a single stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The peer reset the stream.
    #[error("stream {stream_id} reset by peer: {status}")]
    Reset { stream_id: u32, status: StatusCode },

    /// A local send on a stream that can no longer send.
    #[error("stream {0} is closed for sending")]
    SendOnClosed(u32),

    /// A second close/reset of an already closed stream.
    #[error("stream {0} is already closed")]
    AlreadyClosed(u32),

    /// The stream is not in the session's table.
    #[error("stream {0} does not exist")]
    Unknown(u32),

    /// The peer's GOAWAY watermark excluded this stream.
    #[error("stream {stream_id} was not processed by peer (last good stream {last_good_stream_id})")]
    Refused {
        stream_id: u32,
        last_good_stream_id: u32,
    },

    /// A frame for this stream could not be decoded.
    #[error("stream {stream_id}: {error}")]
    Framing {
        stream_id: u32,
        error: FramingError,
    },

    /// A protocol violation attributed to this stream.
    #[error("stream {stream_id}: {error}")]
    Protocol {
        stream_id: u32,
        error: ProtocolError,
    },

    /// The session went away underneath the stream.
    #[error("stream {stream_id} aborted: {error}")]
    Transport {
        stream_id: u32,
        error: TransportError,
    },
}

impl StreamError {
    /// The stream this error belongs to.
    pub fn stream_id(&self) -> u32 {
        match self {
            StreamError::Reset { stream_id, .. }
            | StreamError::Refused { stream_id, .. }
            | StreamError::Framing { stream_id, .. }
            | StreamError::Protocol { stream_id, .. }
            | StreamError::Transport { stream_id, .. } => *stream_id,
            StreamError::SendOnClosed(id)
            | StreamError::AlreadyClosed(id)
            | StreamError::Unknown(id) => *id,
        }
    }
}

/// The underlying byte stream failed or closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("I/O error ({kind:?}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },

    #[error("session closed")]
    SessionClosed,

    #[error("session ended by fatal framing error: {0}")]
    Framing(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Session-level error carried by [`SessionEvent::Error`](crate::SessionEvent::Error).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by [`PriorityList`](crate::PriorityList) bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriorityError {
    #[error("resource {0:?} is already scheduled")]
    DuplicateName(String),

    #[error("resource {0:?} is not scheduled")]
    UnknownName(String),

    #[error("resource {0:?} already has an open stream")]
    AlreadyStarted(String),

    #[error("resource {0:?} has no open stream")]
    NotOpened(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Priority(#[from] PriorityError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires an opened session.
    #[error("session is not open")]
    NotOpen,

    /// No new streams after a GOAWAY was sent or received.
    #[error("session is going away")]
    GoingAway,

    /// Every stream id of this endpoint's parity has been used.
    #[error("stream ids exhausted")]
    StreamIdsExhausted,
}

impl From<ProcessingError> for Error {
    fn from(err: ProcessingError) -> Self {
        Error::Framing(FramingError::Processing(err))
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
