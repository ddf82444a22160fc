//! Header compression processor.
//!
//! Thin wrapper around `fluke-hpack`. The compressor starts from the HPACK
//! static table (the pre-seeded dictionary) and, in stateful mode, keeps its
//! dynamic table across every frame of a session. Stateless mode rebuilds
//! both sides before each transform so no history is carried between frames.
//!
//! The processor sits in the [`Pipeline`](crate::Pipeline) as a
//! [`ProcessType::Headers`] transform: outbound it turns the plain header
//! block produced by the codec into an HPACK block, inbound it turns the
//! HPACK block back into the plain layout so the codec can validate it.

use crate::codec::{decode_header_pairs, encode_header_pairs};
use crate::error::ProcessingError;
use crate::pipeline::{Direction, MessageProcessor, ProcessType};

/// HPACK decoder for header blocks.
/// Wraps `fluke_hpack::Decoder` which maintains dynamic table state per-session.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Decoder::new(),
        }
    }

    /// Decode an HPACK block into name/value pairs, keeping duplicates.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<(String, String)>, ProcessingError> {
        let pairs = self
            .inner
            .decode(data)
            .map_err(|e| ProcessingError::Decompression(format!("{:?}", e)))?;
        pairs
            .into_iter()
            .map(|(name, value)| {
                let name = String::from_utf8(name).map_err(|_| {
                    ProcessingError::Decompression("header name is not UTF-8".to_string())
                })?;
                let value = String::from_utf8(value).map_err(|_| {
                    ProcessingError::Decompression("header value is not UTF-8".to_string())
                })?;
                Ok((name, value))
            })
            .collect()
    }
}

/// HPACK encoder for header blocks.
/// Wraps `fluke_hpack::Encoder` which maintains dynamic table state per-session.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    /// Encode name/value pairs into an HPACK block.
    pub fn encode(&mut self, headers: &[(String, String)]) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
            .collect();
        self.inner.encode(pairs)
    }
}

/// Pipeline processor compressing header blocks with HPACK.
///
/// One instance per session: the encoder serves the outbound direction and
/// the decoder the inbound direction.
#[derive(Debug)]
pub struct HeaderCompressionProcessor {
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    stateless: bool,
}

impl HeaderCompressionProcessor {
    /// Compression whose dictionary persists across frames.
    pub fn stateful() -> Self {
        Self {
            encoder: HpackEncoder::new(),
            decoder: HpackDecoder::new(),
            stateless: false,
        }
    }

    /// Compression reset to the seeded dictionary before every frame.
    pub fn stateless() -> Self {
        Self {
            stateless: true,
            ..Self::stateful()
        }
    }

    pub fn is_stateless(&self) -> bool {
        self.stateless
    }
}

impl MessageProcessor for HeaderCompressionProcessor {
    fn name(&self) -> &'static str {
        "header-compression"
    }

    fn process_type(&self) -> ProcessType {
        ProcessType::Headers
    }

    fn transform(
        &mut self,
        direction: Direction,
        bytes: Vec<u8>,
        _flags: u8,
    ) -> Result<Vec<u8>, ProcessingError> {
        match direction {
            Direction::Outbound => {
                if self.stateless {
                    self.encoder = HpackEncoder::new();
                }
                let pairs = decode_header_pairs(&bytes)
                    .map_err(|e| ProcessingError::Compression(e.to_string()))?;
                Ok(self.encoder.encode(&pairs))
            }
            Direction::Inbound => {
                if self.stateless {
                    self.decoder = HpackDecoder::new();
                }
                let pairs = self.decoder.decode(&bytes)?;
                Ok(encode_header_pairs(
                    pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())),
                ))
            }
        }
    }
}
