//! Frame codec.
//!
//! Serializes [`Frame`]s to wire bytes and parses them back, running the
//! session's [`Pipeline`] on the way in both directions. Parsing is
//! incremental: feed raw transport bytes with [`FrameCodec::feed`] and pull
//! complete frames with [`FrameCodec::decode_next`]. A whole frame is
//! consumed from the buffer before it is parsed, so a recoverable error on
//! one frame leaves the buffer aligned on the next.

use bytes::{Bytes, BytesMut};

use crate::error::FramingError;
use crate::frame::{
    Frame, FrameBody, FrameHeader, FrameType, Headers, SettingsMap, StatusCode,
    CONTROL_HEADER_SIZE, DATA_HEADER_SIZE, DEFAULT_VERSION, MAX_PAYLOAD_SIZE, STREAM_ID_MASK,
};
use crate::pipeline::{Direction, Pipeline, ProcessType};

/// Maximum plain header block size (256 KB).
/// Bounds allocation when a peer declares absurd header counts.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Bounds-checked reader over one frame payload.
struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8], context: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            context,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FramingError> {
        if self.remaining() < n {
            return Err(FramingError::Truncated {
                context: self.context,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FramingError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, FramingError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, FramingError> {
        Ok(self.u32()? as i32)
    }

    fn i64(&mut self) -> Result<i64, FramingError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_be_bytes(raw))
    }

    fn string(&mut self, what: &'static str) -> Result<String, FramingError> {
        let len = self.i32()?;
        if len < 0 {
            return Err(FramingError::NegativeLength(what));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FramingError::InvalidUtf8(what))
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn finish(&self) -> Result<(), FramingError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(FramingError::TrailingBytes {
                frame_type: self.context,
                extra,
            }),
        }
    }
}

/// Encode name/value pairs in the plain header block layout:
/// `count:i32` then `count × (len:i32, name, len:i32, value)`.
pub fn encode_header_pairs<'a, I>(pairs: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut body = Vec::new();
    let mut count: i32 = 0;
    for (name, value) in pairs {
        body.extend_from_slice(&(name.len() as i32).to_be_bytes());
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(&(value.len() as i32).to_be_bytes());
        body.extend_from_slice(value.as_bytes());
        count += 1;
    }
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Encode a header map in the plain header block layout.
pub fn encode_header_block(headers: &Headers) -> Vec<u8> {
    encode_header_pairs(headers.iter().map(|(n, v)| (n.as_str(), v.as_str())))
}

/// Parse a plain header block into pairs, duplicates included.
pub fn decode_header_pairs(block: &[u8]) -> Result<Vec<(String, String)>, FramingError> {
    if block.len() > MAX_HEADER_BLOCK_SIZE {
        return Err(FramingError::HeaderBlockTooLarge {
            size: block.len(),
            max: MAX_HEADER_BLOCK_SIZE,
        });
    }
    let mut reader = PayloadReader::new(block, "header block");
    let count = reader.i32()?;
    if count < 0 {
        return Err(FramingError::NegativeLength("header count"));
    }
    // Each pair needs at least 8 bytes of length prefixes
    let mut pairs = Vec::with_capacity((count as usize).min(block.len() / 8));
    for _ in 0..count {
        let name = reader.string("name")?;
        let value = reader.string("value")?;
        pairs.push((name, value));
    }
    reader.finish()?;
    Ok(pairs)
}

/// Parse a plain header block, rejecting repeated names.
pub fn decode_header_block(block: &[u8]) -> Result<Headers, FramingError> {
    let mut headers = Headers::new();
    for (name, value) in decode_header_pairs(block)? {
        if headers.contains_key(&name) {
            return Err(FramingError::DuplicateHeader(name));
        }
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Stateful frame codec for one session.
#[derive(Debug)]
pub struct FrameCodec {
    version: u16,
    pipeline: Pipeline,
    /// Buffer for incomplete frames
    buffer: BytesMut,
    max_frame_payload: usize,
    /// Header of the last frame `decode_next` failed on
    failed_header: Option<FrameHeader>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Codec speaking [`DEFAULT_VERSION`] with an empty pipeline.
    pub fn new() -> Self {
        Self::with_pipeline(DEFAULT_VERSION, Pipeline::new())
    }

    pub fn with_pipeline(version: u16, pipeline: Pipeline) -> Self {
        Self {
            version: version & 0x7FFF,
            pipeline,
            buffer: BytesMut::new(),
            max_frame_payload: MAX_PAYLOAD_SIZE,
            failed_header: None,
        }
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Reject inbound frames declaring a payload above `max`.
    pub fn set_max_frame_payload(&mut self, max: usize) {
        self.max_frame_payload = max.min(MAX_PAYLOAD_SIZE);
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Bytes received but not yet forming a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Header of the frame the last failed [`decode_next`](Self::decode_next)
    /// call was parsing.
    pub fn failed_header(&self) -> Option<&FrameHeader> {
        self.failed_header.as_ref()
    }

    /// Drop buffered input (e.g., after the transport was replaced).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.failed_header = None;
    }

    /// Serialize one frame, running outbound processors.
    pub fn serialize(&mut self, frame: &Frame) -> Result<Vec<u8>, FramingError> {
        let frame_type = frame.frame_type();

        let payload = if let FrameBody::Data(data) = &frame.body {
            self.pipeline.apply(
                Direction::Outbound,
                ProcessType::Message,
                data.to_vec(),
                frame.flags,
            )?
        } else {
            let mut payload = Vec::new();
            match &frame.body {
                FrameBody::SynStream {
                    associated_stream_id,
                    priority,
                    slot,
                    ..
                } => {
                    payload.extend_from_slice(&(associated_stream_id & STREAM_ID_MASK).to_be_bytes());
                    payload.push(*priority);
                    payload.push(*slot);
                    payload.push(0); // reserved
                }
                FrameBody::Rst { status_code } => {
                    payload.extend_from_slice(&status_code.to_u32().to_be_bytes());
                }
                FrameBody::Settings { entries, .. } => {
                    payload.extend_from_slice(&(entries.len() as i32).to_be_bytes());
                    for (key, value) in entries {
                        payload.extend_from_slice(&key.to_be_bytes());
                        payload.extend_from_slice(&value.to_be_bytes());
                    }
                }
                FrameBody::GoAway {
                    last_good_stream_id,
                    status_code,
                } => {
                    payload.extend_from_slice(&(last_good_stream_id & STREAM_ID_MASK).to_be_bytes());
                    payload.extend_from_slice(&status_code.to_u32().to_be_bytes());
                }
                FrameBody::WindowUpdate {
                    delta_window_size, ..
                } => {
                    payload.extend_from_slice(&delta_window_size.to_be_bytes());
                }
                FrameBody::CreditUpdate {
                    credit_addition, ..
                } => {
                    payload.extend_from_slice(&credit_addition.to_be_bytes());
                }
                FrameBody::SynReply { .. }
                | FrameBody::Headers { .. }
                | FrameBody::Ping { .. }
                | FrameBody::Data(_) => {}
            }

            if let Some(headers) = frame.header_block() {
                let block = encode_header_block(headers);
                let block = if frame.is_uncompressed() {
                    block
                } else {
                    self.pipeline
                        .apply(Direction::Outbound, ProcessType::Headers, block, frame.flags)?
                };
                payload.extend_from_slice(&block);
            }

            self.pipeline
                .apply(Direction::Outbound, ProcessType::Message, payload, frame.flags)?
        };

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FramingError::FrameTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = FrameHeader {
            is_control: frame.is_control(),
            version: if frame.is_control() { self.version } else { 0 },
            frame_type: frame_type.code(),
            flags: frame.flags,
            length: payload.len() as u32,
            stream_id: frame.stream_id,
        };
        let mut out = Vec::with_capacity(header.header_size() + payload.len());
        header.write_to(&mut out);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse exactly one complete frame from `bytes`.
    ///
    /// The declared length must match the bytes supplied.
    pub fn deserialize(&mut self, bytes: &[u8]) -> Result<Frame, FramingError> {
        let header = FrameHeader::parse(bytes).ok_or_else(|| {
            let needed = match bytes.first() {
                Some(b) if b & 0x80 != 0 => CONTROL_HEADER_SIZE,
                _ => DATA_HEADER_SIZE,
            };
            FramingError::Truncated {
                context: "frame header",
                needed,
                available: bytes.len(),
            }
        })?;
        let actual = bytes.len() - header.header_size();
        if actual != header.length as usize {
            return Err(FramingError::LengthMismatch {
                declared: header.length as usize,
                actual,
            });
        }
        let payload = bytes[header.header_size()..].to_vec();
        self.parse_frame(&header, payload)
    }

    /// Append raw transport bytes to the read buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame out of the read buffer.
    ///
    /// Returns `Ok(None)` if more data is needed.
    pub fn decode_next(&mut self) -> Result<Option<Frame>, FramingError> {
        let header = match FrameHeader::parse(&self.buffer) {
            Some(h) => h,
            None => return Ok(None),
        };

        if header.length as usize > self.max_frame_payload {
            let err = FramingError::FrameTooLarge {
                size: header.length as usize,
                max: self.max_frame_payload,
            };
            self.failed_header = Some(header);
            return Err(err);
        }

        let total_size = header.total_size();
        if self.buffer.len() < total_size {
            return Ok(None);
        }

        let raw = self.buffer.split_to(total_size);
        let payload = raw[header.header_size()..].to_vec();
        match self.parse_frame(&header, payload) {
            Ok(frame) => {
                self.failed_header = None;
                Ok(Some(frame))
            }
            Err(err) => {
                self.failed_header = Some(header);
                Err(err)
            }
        }
    }

    /// Feed `data` and return every complete frame.
    ///
    /// The first error aborts the batch; frames already decoded are lost to
    /// the caller, so the session uses [`decode_next`](Self::decode_next)
    /// directly.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<Frame>, FramingError> {
        self.feed(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.decode_next()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn parse_frame(&mut self, header: &FrameHeader, payload: Vec<u8>) -> Result<Frame, FramingError> {
        if !header.is_control {
            let data = self.pipeline.apply(
                Direction::Inbound,
                ProcessType::Message,
                payload,
                header.flags,
            )?;
            return Ok(Frame {
                flags: header.flags,
                stream_id: header.stream_id,
                body: FrameBody::Data(Bytes::from(data)),
            });
        }

        if header.version != self.version {
            return Err(FramingError::UnsupportedVersion {
                expected: self.version,
                found: header.version,
            });
        }

        let frame_type = match FrameType::from_u16(header.frame_type) {
            Some(FrameType::Data) | None => {
                return Err(FramingError::UnknownFrameType(header.frame_type))
            }
            Some(t) => t,
        };

        let payload = self.pipeline.apply(
            Direction::Inbound,
            ProcessType::Message,
            payload,
            header.flags,
        )?;
        let mut reader = PayloadReader::new(&payload, frame_type.name());

        let body = match frame_type {
            FrameType::SynStream => {
                let associated_stream_id = reader.u32()? & STREAM_ID_MASK;
                let priority = reader.u8()?;
                let slot = reader.u8()?;
                let _reserved = reader.u8()?;
                let headers = self.read_header_block(&mut reader, header, frame_type)?;
                FrameBody::SynStream {
                    associated_stream_id,
                    priority,
                    slot,
                    headers,
                }
            }
            FrameType::SynReply => FrameBody::SynReply {
                headers: self.read_header_block(&mut reader, header, frame_type)?,
            },
            FrameType::Headers => FrameBody::Headers {
                headers: self.read_header_block(&mut reader, header, frame_type)?,
            },
            FrameType::Rst => {
                let status_code = StatusCode::from_u32(reader.u32()?);
                reader.finish()?;
                FrameBody::Rst { status_code }
            }
            FrameType::Settings => {
                let count = reader.i32()?;
                if count < 0 {
                    return Err(FramingError::NegativeLength("settings count"));
                }
                let mut entries = SettingsMap::new();
                for _ in 0..count {
                    let key = reader.i32()?;
                    let value = reader.i32()?;
                    entries.insert(key, value);
                }
                let headers = self.read_header_block(&mut reader, header, frame_type)?;
                FrameBody::Settings { entries, headers }
            }
            FrameType::Ping => FrameBody::Ping {
                headers: self.read_header_block(&mut reader, header, frame_type)?,
            },
            FrameType::GoAway => {
                let last_good_stream_id = reader.u32()? & STREAM_ID_MASK;
                let status_code = StatusCode::from_u32(reader.u32()?);
                reader.finish()?;
                FrameBody::GoAway {
                    last_good_stream_id,
                    status_code,
                }
            }
            FrameType::WindowUpdate => {
                let delta_window_size = reader.i64()?;
                let headers = self.read_header_block(&mut reader, header, frame_type)?;
                FrameBody::WindowUpdate {
                    delta_window_size,
                    headers,
                }
            }
            FrameType::CreditUpdate => {
                let credit_addition = reader.i64()?;
                let headers = self.read_header_block(&mut reader, header, frame_type)?;
                FrameBody::CreditUpdate {
                    credit_addition,
                    headers,
                }
            }
            FrameType::Data => return Err(FramingError::UnknownFrameType(header.frame_type)),
        };

        Ok(Frame {
            flags: header.flags,
            stream_id: header.stream_id,
            body,
        })
    }

    /// The header block occupies the rest of the payload.
    fn read_header_block(
        &mut self,
        reader: &mut PayloadReader<'_>,
        header: &FrameHeader,
        frame_type: FrameType,
    ) -> Result<Headers, FramingError> {
        let block = reader.rest().to_vec();
        let uncompressed = header.flags & crate::frame::flags::no_compression(frame_type.code()) != 0;
        let block = if uncompressed {
            block
        } else {
            self.pipeline
                .apply(Direction::Inbound, ProcessType::Headers, block, header.flags)?
        };
        decode_header_block(&block)
    }
}
