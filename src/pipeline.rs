//! Message-processing pipeline.
//!
//! An ordered chain of reversible byte transforms the codec applies to every
//! frame. A processor declares whether it works on the header block only
//! ([`ProcessType::Headers`]) or on the whole payload ([`ProcessType::Message`]).
//!
//! Outbound, header processors run first (in registration order) and message
//! processors second. Inbound runs the exact inverse: message processors, then
//! header processors, each class in reverse registration order.

use crate::error::ProcessingError;

/// Which byte range a processor transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    /// The encoded header block of a control frame.
    Headers,
    /// The complete frame payload, data frames included.
    Message,
}

/// Direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A reversible transform over a byte range.
///
/// `transform(Inbound, transform(Outbound, x))` must equal `x` when both ends
/// run matching processors.
pub trait MessageProcessor: Send {
    /// Short name for logs and errors.
    fn name(&self) -> &'static str;

    fn process_type(&self) -> ProcessType;

    /// Transform `bytes`. `flags` are the flags of the frame being processed.
    fn transform(
        &mut self,
        direction: Direction,
        bytes: Vec<u8>,
        flags: u8,
    ) -> Result<Vec<u8>, ProcessingError>;
}

/// Passes bytes through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct IdentityProcessor {
    process_type: ProcessType,
}

impl IdentityProcessor {
    pub fn new(process_type: ProcessType) -> Self {
        Self { process_type }
    }
}

impl Default for IdentityProcessor {
    fn default() -> Self {
        Self::new(ProcessType::Headers)
    }
}

impl MessageProcessor for IdentityProcessor {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn process_type(&self) -> ProcessType {
        self.process_type
    }

    fn transform(
        &mut self,
        _direction: Direction,
        bytes: Vec<u8>,
        _flags: u8,
    ) -> Result<Vec<u8>, ProcessingError> {
        Ok(bytes)
    }
}

/// Ordered list of processors owned by one session.
#[derive(Default)]
pub struct Pipeline {
    processors: Vec<Box<dyn MessageProcessor>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.processors.iter().map(|p| p.name()).collect();
        f.debug_struct("Pipeline").field("processors", &names).finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a processor to the end of the chain.
    pub fn push(&mut self, processor: Box<dyn MessageProcessor>) {
        self.processors.push(processor);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, processor: Box<dyn MessageProcessor>) -> Self {
        self.push(processor);
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run every processor of `process_type` over `bytes`.
    pub fn apply(
        &mut self,
        direction: Direction,
        process_type: ProcessType,
        mut bytes: Vec<u8>,
        flags: u8,
    ) -> Result<Vec<u8>, ProcessingError> {
        match direction {
            Direction::Outbound => {
                for processor in self
                    .processors
                    .iter_mut()
                    .filter(|p| p.process_type() == process_type)
                {
                    bytes = processor.transform(direction, bytes, flags)?;
                }
            }
            Direction::Inbound => {
                for processor in self
                    .processors
                    .iter_mut()
                    .rev()
                    .filter(|p| p.process_type() == process_type)
                {
                    bytes = processor.transform(direction, bytes, flags)?;
                }
            }
        }
        Ok(bytes)
    }
}
