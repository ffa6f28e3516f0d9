//! Codec errors
//!
//! Every variant carries enough context to tell a corrupted frame from a
//! frame that is simply too large for the transport.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoded envelope exceeds the transport's message size limit
    #[error("Envelope too large: {size} bytes exceeds maximum {max}")]
    Oversized { size: usize, max: usize },

    /// Frame too short to contain the leading type field
    #[error("Truncated frame: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    /// bincode failed to (de)serialize the envelope body
    #[error("Serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

impl CodecError {
    pub fn oversized(size: usize, max: usize) -> Self {
        Self::Oversized { size, max }
    }

    pub fn truncated(need: usize, got: usize) -> Self {
        Self::Truncated { need, got }
    }

    /// True when the bytes themselves are damaged, as opposed to a size limit.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Truncated { .. } | Self::Serialization(_))
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
