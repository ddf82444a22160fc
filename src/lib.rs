//! sm-http2: a stream-multiplexing session protocol
//!
//! Many logical request/response streams share one ordered byte transport.
//! Frames are framed SPDY-style, header blocks pass through a pluggable
//! processing pipeline, and the session keeps per-stream state together
//! with session-wide flow control.
//!
//! # Features
//!
//! - **Sans-I/O Session**: [`Session`] consumes and produces bytes; no socket inside
//! - **Async Driver**: [`Connection`] runs a session over any tokio `AsyncRead + AsyncWrite`
//! - **Frame Codec**: DATA, SYN_STREAM, SYN_REPLY, RST_STREAM, SETTINGS, PING,
//!   GOAWAY, HEADERS, WINDOW_UPDATE and CREDIT_UPDATE
//! - **Message Pipeline**: ordered header and whole-message processors
//! - **Header Compression**: stateful or stateless via fluke-hpack
//! - **Flow Control**: window-update or credit accounting per session
//! - **Priority Scheduling**: round-robin download scheduler
//!
//! # Quick Start
//!
//! ```rust
//! use sm_http2::{headers, Frame, FrameBody, FrameCodec};
//!
//! let mut codec = FrameCodec::new();
//! let bytes = codec
//!     .serialize(&Frame::syn_stream(1, 0, headers([(":path", "/a.txt")]), true))
//!     .unwrap();
//!
//! for frame in codec.process(&bytes).unwrap() {
//!     if let FrameBody::SynStream { headers, .. } = &frame.body {
//!         assert_eq!(headers[":path"], "/a.txt");
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`frame`]: frame types, constants and header parsing
//! - [`codec`]: bytes to frames and back, header block encoding
//! - [`pipeline`]: message processors applied around the codec
//! - [`session`] and [`stream`]: the protocol state machine
//! - [`flow_control`]: send and receive allowance
//! - [`connection`]: tokio driver
//! - [`priority`]: download scheduling, independent of the session
//!
//! TLS, NPN negotiation and HTTP semantics are left to the application.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frame;
pub mod hpack;
pub mod pipeline;
pub mod priority;
pub mod session;
pub mod stream;

pub use codec::{
    decode_header_block, decode_header_pairs, encode_header_block, encode_header_pairs,
    FrameCodec, MAX_HEADER_BLOCK_SIZE,
};
pub use config::{CompressionMode, Role, SessionConfig};
pub use connection::{Connection, StreamHandle};
pub use error::{
    Error, FramingError, PriorityError, ProcessingError, ProtocolError, Result, SessionError,
    StreamError, TransportError,
};
pub use flow_control::{FlowControl, FlowControlScheme};
pub use frame::{
    flags, frame_type, headers, settings_id, Frame, FrameBody, FrameHeader, FrameType, Headers,
    SettingsMap, StatusCode, StreamId, DEFAULT_VERSION,
};
pub use hpack::{HeaderCompressionProcessor, HpackDecoder, HpackEncoder};
pub use pipeline::{Direction, IdentityProcessor, MessageProcessor, Pipeline, ProcessType};
pub use priority::{NextStream, Priority, PriorityList, PriorityRecord, SharedPriorityList};
pub use session::{Session, SessionEvent, SessionState, DEFAULT_PRIORITY};
pub use stream::{Stream, StreamState};
