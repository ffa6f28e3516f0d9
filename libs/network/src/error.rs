//! Transport Error Types
//!
//! Failures reported by group-communication transports. The protocol client
//! only needs to tell three situations apart: the transport is gone
//! (`NotConnected`), something fatal happened on the wire (`Network`,
//! `Refused`, `InvalidGroup`), or a single frame was bad and reading can go on
//! (`is_transient`).

use codec::CodecError;
use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// No session with the daemon / bus
    #[error("Transport not connected")]
    NotConnected,

    /// Fatal networking error; the session should be torn down
    #[error("Network error: {message}")]
    Network { message: String },

    /// Connect attempt refused
    #[error("Connection refused by {address}: {message}")]
    Refused { address: String, message: String },

    /// Frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Group name not acceptable to the transport
    #[error("Invalid group '{group}'")]
    InvalidGroup { group: String },

    /// A blocking call was interrupted before a frame arrived
    #[error("Interrupted: {operation}")]
    Interrupted { operation: String },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a connect-refused error
    pub fn refused(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Refused {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn invalid_group(group: impl Into<String>) -> Self {
        Self::InvalidGroup {
            group: group.into(),
        }
    }

    pub fn interrupted(operation: impl Into<String>) -> Self {
        Self::Interrupted {
            operation: operation.into(),
        }
    }

    /// A bad frame or an interrupted wait; the next read may well succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Codec(_) | Self::Interrupted { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::NotConnected => "not_connected",
            TransportError::Network { .. } => "network",
            TransportError::Refused { .. } => "refused",
            TransportError::Codec(_) => "codec",
            TransportError::InvalidGroup { .. } => "invalid_group",
            TransportError::Interrupted { .. } => "interrupted",
        }
    }
}
