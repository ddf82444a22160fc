//! Frame types and wire constants.
//!
//! Two frame shapes share the wire, discriminated by the top bit of the
//! first byte:
//!
//! ```text
//! Control frame (12-byte header):
//! +-+-----------------------------+-------------------------------+
//! |C|       Version (15)          |          Type (16)            |
//! +-+-------------+---------------+-------------------------------+
//! |  Flags (8)    |                 Length (24)                   |
//! +-+-------------+-----------------------------------------------+
//! |R|                    Stream-ID (31)                           |
//! +-+-------------------------------------------------------------+
//! |                 Type-specific payload ...                     |
//!
//! Data frame (8-byte header):
//! +-+-------------------------------------------------------------+
//! |0|                    Stream-ID (31)                           |
//! +---------------+-----------------------------------------------+
//! |  Flags (8)    |                 Length (24)                   |
//! +---------------+-----------------------------------------------+
//! |                 Payload ...                                   |
//! ```

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// Header name/value pairs. Names are unique; ordering is by name.
pub type Headers = BTreeMap<String, String>;

/// Settings entries carried by a SETTINGS frame.
pub type SettingsMap = BTreeMap<i32, i32>;

/// Stream identifier (31 bits on the wire).
pub type StreamId = u32;

/// Mask clearing the reserved top bit of a stream id.
pub const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// Control frame header size in bytes.
pub const CONTROL_HEADER_SIZE: usize = 12;

/// Data frame header size in bytes.
pub const DATA_HEADER_SIZE: usize = 8;

/// Largest payload the 24-bit length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Protocol version spoken by default.
pub const DEFAULT_VERSION: u16 = 3;

/// Control frame type codes.
pub mod frame_type {
    pub const DATA: u16 = 0;
    pub const SYN_STREAM: u16 = 1;
    pub const SYN_REPLY: u16 = 2;
    pub const RST_STREAM: u16 = 3;
    pub const SETTINGS: u16 = 4;
    pub const PING: u16 = 6;
    pub const GOAWAY: u16 = 7;
    pub const HEADERS: u16 = 8;
    pub const WINDOW_UPDATE: u16 = 9;
    pub const CREDIT_UPDATE: u16 = 10;
}

/// Frame flags.
///
/// | flag | frames | meaning |
/// |------|--------|---------|
/// | `0x01` | all | FIN |
/// | `0x02` | SYN_STREAM | unidirectional |
/// | `0x04` | SYN_STREAM | header block not compressed |
/// | `0x02` | other header-carrying control frames | header block not compressed |
pub mod flags {
    use super::frame_type;

    pub const FIN: u8 = 0x01;
    pub const UNIDIRECTIONAL: u8 = 0x02;
    pub const SYN_STREAM_NO_COMPRESSION: u8 = 0x04;
    pub const NO_COMPRESSION: u8 = 0x02;

    /// The "no header compression" bit for a given frame type.
    pub fn no_compression(frame_type: u16) -> u8 {
        if frame_type == frame_type::SYN_STREAM {
            SYN_STREAM_NO_COMPRESSION
        } else {
            NO_COMPRESSION
        }
    }
}

/// Well-known SETTINGS keys.
#[allow(dead_code)]
pub mod settings_id {
    pub const UPLOAD_BANDWIDTH: i32 = 1;
    pub const DOWNLOAD_BANDWIDTH: i32 = 2;
    pub const ROUND_TRIP_TIME: i32 = 3;
    pub const MAX_CONCURRENT_STREAMS: i32 = 4;
    pub const CURRENT_CWND: i32 = 5;
    pub const DOWNLOAD_RETRANS_RATE: i32 = 6;
    pub const INITIAL_WINDOW_SIZE: i32 = 7;
    pub const CLIENT_CERTIFICATE_VECTOR_SIZE: i32 = 8;
}

/// RST_STREAM / GOAWAY status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    ProtocolError,
    InvalidStream,
    RefusedStream,
    UnsupportedVersion,
    Cancel,
    InternalError,
    FlowControlError,
    StreamInUse,
    StreamAlreadyClosed,
    InvalidCredentials,
    FrameTooLarge,
    /// A code this endpoint does not know.
    Other(u32),
}

impl StatusCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => StatusCode::Success,
            1 => StatusCode::ProtocolError,
            2 => StatusCode::InvalidStream,
            3 => StatusCode::RefusedStream,
            4 => StatusCode::UnsupportedVersion,
            5 => StatusCode::Cancel,
            6 => StatusCode::InternalError,
            7 => StatusCode::FlowControlError,
            8 => StatusCode::StreamInUse,
            9 => StatusCode::StreamAlreadyClosed,
            10 => StatusCode::InvalidCredentials,
            11 => StatusCode::FrameTooLarge,
            other => StatusCode::Other(other),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::ProtocolError => 1,
            StatusCode::InvalidStream => 2,
            StatusCode::RefusedStream => 3,
            StatusCode::UnsupportedVersion => 4,
            StatusCode::Cancel => 5,
            StatusCode::InternalError => 6,
            StatusCode::FlowControlError => 7,
            StatusCode::StreamInUse => 8,
            StatusCode::StreamAlreadyClosed => 9,
            StatusCode::InvalidCredentials => 10,
            StatusCode::FrameTooLarge => 11,
            StatusCode::Other(code) => code,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Success => write!(f, "SUCCESS"),
            StatusCode::ProtocolError => write!(f, "PROTOCOL_ERROR"),
            StatusCode::InvalidStream => write!(f, "INVALID_STREAM"),
            StatusCode::RefusedStream => write!(f, "REFUSED_STREAM"),
            StatusCode::UnsupportedVersion => write!(f, "UNSUPPORTED_VERSION"),
            StatusCode::Cancel => write!(f, "CANCEL"),
            StatusCode::InternalError => write!(f, "INTERNAL_ERROR"),
            StatusCode::FlowControlError => write!(f, "FLOW_CONTROL_ERROR"),
            StatusCode::StreamInUse => write!(f, "STREAM_IN_USE"),
            StatusCode::StreamAlreadyClosed => write!(f, "STREAM_ALREADY_CLOSED"),
            StatusCode::InvalidCredentials => write!(f, "INVALID_CREDENTIALS"),
            StatusCode::FrameTooLarge => write!(f, "FRAME_TOO_LARGE"),
            StatusCode::Other(code) => write!(f, "UNKNOWN({})", code),
        }
    }
}

/// Frame type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Data,
    SynStream,
    SynReply,
    Rst,
    Settings,
    Ping,
    GoAway,
    Headers,
    WindowUpdate,
    CreditUpdate,
}

impl FrameType {
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            frame_type::DATA => Some(FrameType::Data),
            frame_type::SYN_STREAM => Some(FrameType::SynStream),
            frame_type::SYN_REPLY => Some(FrameType::SynReply),
            frame_type::RST_STREAM => Some(FrameType::Rst),
            frame_type::SETTINGS => Some(FrameType::Settings),
            frame_type::PING => Some(FrameType::Ping),
            frame_type::GOAWAY => Some(FrameType::GoAway),
            frame_type::HEADERS => Some(FrameType::Headers),
            frame_type::WINDOW_UPDATE => Some(FrameType::WindowUpdate),
            frame_type::CREDIT_UPDATE => Some(FrameType::CreditUpdate),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            FrameType::Data => frame_type::DATA,
            FrameType::SynStream => frame_type::SYN_STREAM,
            FrameType::SynReply => frame_type::SYN_REPLY,
            FrameType::Rst => frame_type::RST_STREAM,
            FrameType::Settings => frame_type::SETTINGS,
            FrameType::Ping => frame_type::PING,
            FrameType::GoAway => frame_type::GOAWAY,
            FrameType::Headers => frame_type::HEADERS,
            FrameType::WindowUpdate => frame_type::WINDOW_UPDATE,
            FrameType::CreditUpdate => frame_type::CREDIT_UPDATE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::SynStream => "SYN_STREAM",
            FrameType::SynReply => "SYN_REPLY",
            FrameType::Rst => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::Ping => "PING",
            FrameType::GoAway => "GOAWAY",
            FrameType::Headers => "HEADERS",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::CreditUpdate => "CREDIT_UPDATE",
        }
    }

    /// Whether this frame type ends with a header block.
    pub fn carries_headers(self) -> bool {
        !matches!(self, FrameType::Data | FrameType::Rst | FrameType::GoAway)
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed frame header (12 bytes for control frames, 8 for data frames).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub is_control: bool,
    /// Zero for data frames.
    pub version: u16,
    /// Raw type code; [`frame_type::DATA`] for data frames.
    pub frame_type: u16,
    pub flags: u8,
    /// 24 bits.
    pub length: u32,
    /// 31 bits (high bit reserved).
    pub stream_id: StreamId,
}

impl FrameHeader {
    /// Parse a frame header from the start of `data`.
    ///
    /// Returns `None` until enough bytes for the header are present.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let first = *data.first()?;
        let is_control = first & 0x80 != 0;

        if is_control {
            if data.len() < CONTROL_HEADER_SIZE {
                return None;
            }
            let version = u16::from_be_bytes([data[0], data[1]]) & 0x7FFF;
            let frame_type = u16::from_be_bytes([data[2], data[3]]);
            let flags = data[4];
            let length = u32::from_be_bytes([0, data[5], data[6], data[7]]);
            let stream_id =
                u32::from_be_bytes([data[8], data[9], data[10], data[11]]) & STREAM_ID_MASK;
            Some(Self {
                is_control,
                version,
                frame_type,
                flags,
                length,
                stream_id,
            })
        } else {
            if data.len() < DATA_HEADER_SIZE {
                return None;
            }
            let stream_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) & STREAM_ID_MASK;
            let flags = data[4];
            let length = u32::from_be_bytes([0, data[5], data[6], data[7]]);
            Some(Self {
                is_control,
                version: 0,
                frame_type: frame_type::DATA,
                flags,
                length,
                stream_id,
            })
        }
    }

    /// Size of this header on the wire.
    pub fn header_size(&self) -> usize {
        if self.is_control {
            CONTROL_HEADER_SIZE
        } else {
            DATA_HEADER_SIZE
        }
    }

    /// Total frame size including header.
    pub fn total_size(&self) -> usize {
        self.header_size() + self.length as usize
    }

    /// Check if the FIN flag is set.
    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    /// Encode into `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let len = self.length.to_be_bytes();
        let stream_id = (self.stream_id & STREAM_ID_MASK).to_be_bytes();
        if self.is_control {
            out.extend_from_slice(&(0x8000 | (self.version & 0x7FFF)).to_be_bytes());
            out.extend_from_slice(&self.frame_type.to_be_bytes());
            out.push(self.flags);
            out.extend_from_slice(&len[1..]);
            out.extend_from_slice(&stream_id);
        } else {
            out.extend_from_slice(&stream_id);
            out.push(self.flags);
            out.extend_from_slice(&len[1..]);
        }
    }
}

/// Type-specific frame content.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    Data(Bytes),
    SynStream {
        associated_stream_id: StreamId,
        priority: u8,
        slot: u8,
        headers: Headers,
    },
    SynReply {
        headers: Headers,
    },
    Headers {
        headers: Headers,
    },
    Rst {
        status_code: StatusCode,
    },
    Settings {
        entries: SettingsMap,
        headers: Headers,
    },
    Ping {
        headers: Headers,
    },
    GoAway {
        last_good_stream_id: StreamId,
        status_code: StatusCode,
    },
    WindowUpdate {
        delta_window_size: i64,
        headers: Headers,
    },
    CreditUpdate {
        credit_addition: i64,
        headers: Headers,
    },
}

/// A single wire message.
///
/// `length` is not stored; it is computed when the frame is serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub flags: u8,
    pub stream_id: StreamId,
    pub body: FrameBody,
}

impl Frame {
    fn with_fin(stream_id: StreamId, is_fin: bool, body: FrameBody) -> Self {
        Self {
            flags: if is_fin { flags::FIN } else { 0 },
            stream_id,
            body,
        }
    }

    pub fn data(stream_id: StreamId, payload: impl Into<Bytes>, is_fin: bool) -> Self {
        Self::with_fin(stream_id, is_fin, FrameBody::Data(payload.into()))
    }

    pub fn syn_stream(stream_id: StreamId, priority: u8, headers: Headers, is_fin: bool) -> Self {
        Self::with_fin(
            stream_id,
            is_fin,
            FrameBody::SynStream {
                associated_stream_id: 0,
                priority,
                slot: 0,
                headers,
            },
        )
    }

    pub fn syn_reply(stream_id: StreamId, headers: Headers, is_fin: bool) -> Self {
        Self::with_fin(stream_id, is_fin, FrameBody::SynReply { headers })
    }

    pub fn headers(stream_id: StreamId, headers: Headers, is_fin: bool) -> Self {
        Self::with_fin(stream_id, is_fin, FrameBody::Headers { headers })
    }

    pub fn rst(stream_id: StreamId, status_code: StatusCode) -> Self {
        Self::with_fin(stream_id, false, FrameBody::Rst { status_code })
    }

    pub fn settings(entries: SettingsMap) -> Self {
        Self::with_fin(
            0,
            false,
            FrameBody::Settings {
                entries,
                headers: Headers::new(),
            },
        )
    }

    pub fn ping(id: u32) -> Self {
        Self::with_fin(
            id,
            false,
            FrameBody::Ping {
                headers: Headers::new(),
            },
        )
    }

    pub fn go_away(last_good_stream_id: StreamId, status_code: StatusCode) -> Self {
        Self::with_fin(
            0,
            false,
            FrameBody::GoAway {
                last_good_stream_id,
                status_code,
            },
        )
    }

    pub fn window_update(stream_id: StreamId, delta_window_size: i64) -> Self {
        Self::with_fin(
            stream_id,
            false,
            FrameBody::WindowUpdate {
                delta_window_size,
                headers: Headers::new(),
            },
        )
    }

    pub fn credit_update(stream_id: StreamId, credit_addition: i64) -> Self {
        Self::with_fin(
            stream_id,
            false,
            FrameBody::CreditUpdate {
                credit_addition,
                headers: Headers::new(),
            },
        )
    }

    pub fn frame_type(&self) -> FrameType {
        match &self.body {
            FrameBody::Data(_) => FrameType::Data,
            FrameBody::SynStream { .. } => FrameType::SynStream,
            FrameBody::SynReply { .. } => FrameType::SynReply,
            FrameBody::Headers { .. } => FrameType::Headers,
            FrameBody::Rst { .. } => FrameType::Rst,
            FrameBody::Settings { .. } => FrameType::Settings,
            FrameBody::Ping { .. } => FrameType::Ping,
            FrameBody::GoAway { .. } => FrameType::GoAway,
            FrameBody::WindowUpdate { .. } => FrameType::WindowUpdate,
            FrameBody::CreditUpdate { .. } => FrameType::CreditUpdate,
        }
    }

    pub fn is_control(&self) -> bool {
        !matches!(self.body, FrameBody::Data(_))
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    /// Header compression is disabled for this frame.
    pub fn is_uncompressed(&self) -> bool {
        self.is_control() && self.flags & flags::no_compression(self.frame_type().code()) != 0
    }

    /// Set the "no header compression" flag for this frame's type.
    pub fn without_compression(mut self) -> Self {
        if self.frame_type().carries_headers() {
            self.flags |= flags::no_compression(self.frame_type().code());
        }
        self
    }

    /// The header block, for every control frame except RST and GOAWAY.
    pub fn header_block(&self) -> Option<&Headers> {
        match &self.body {
            FrameBody::SynStream { headers, .. }
            | FrameBody::SynReply { headers }
            | FrameBody::Headers { headers }
            | FrameBody::Settings { headers, .. }
            | FrameBody::Ping { headers }
            | FrameBody::WindowUpdate { headers, .. }
            | FrameBody::CreditUpdate { headers, .. } => Some(headers),
            FrameBody::Data(_) | FrameBody::Rst { .. } | FrameBody::GoAway { .. } => None,
        }
    }
}

/// Build a [`Headers`] map from name/value pairs. Later duplicates win.
pub fn headers<I, K, V>(pairs: I) -> Headers
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
