//! Connection errors
//!
//! Every public operation of the protocol client fails with a
//! [`ConnectionError`], and every error maps onto exactly one code of the
//! closed [`Status`] set so callers that only deal in codes lose nothing.

use network::TransportError;
use thiserror::Error;
use types::Status;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Not connected")]
    NotConnected,

    /// Group is reserved, unknown to the master, or not writable by this peer
    #[error("Invalid group '{group}'")]
    InvalidGroup { group: String },

    #[error("Networking error: {message}")]
    Networking { message: String },

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Master refused the requested protocol version
    #[error("Wrong server version (master supports {})", .supported.as_deref().unwrap_or("unknown"))]
    WrongServerVersion { supported: Option<String> },

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Archive request error: {0}")]
    ArchiveRequest(String),

    /// Non-blocking read found nothing to deliver
    #[error("No data available")]
    NoData,

    /// Administrative disconnect command received; the owner decides how to exit
    #[error("Terminate requested by '{requested_by}'")]
    TerminateRequested { requested_by: String },

    #[error(transparent)]
    Transport(TransportError),
}

pub type Result<T> = std::result::Result<T, ConnectionError>;

impl ConnectionError {
    pub fn invalid_group(group: impl Into<String>) -> Self {
        Self::InvalidGroup {
            group: group.into(),
        }
    }

    pub fn networking(message: impl Into<String>) -> Self {
        Self::Networking {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Status code reported for this error.
    pub fn status(&self) -> Status {
        match self {
            ConnectionError::NotConnected => Status::NotConnected,
            ConnectionError::InvalidGroup { .. } => Status::InvalidGroup,
            ConnectionError::Networking { .. } => Status::NetworkingError,
            ConnectionError::Timeout { .. } => Status::Timeout,
            ConnectionError::WrongServerVersion { .. } => Status::WrongServerVersion,
            ConnectionError::Connect(_) => Status::ConnectError,
            ConnectionError::ArchiveRequest(_) => Status::ArchiveRequestError,
            ConnectionError::NoData => Status::NoData,
            ConnectionError::TerminateRequested { .. } => Status::TerminateRequested,
            ConnectionError::Transport(e) => match e {
                TransportError::NotConnected => Status::NotConnected,
                TransportError::InvalidGroup { .. } => Status::InvalidGroup,
                TransportError::Refused { .. } => Status::ConnectError,
                _ => Status::NetworkingError,
            },
        }
    }
}

impl From<TransportError> for ConnectionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => ConnectionError::NotConnected,
            other => ConnectionError::Transport(other),
        }
    }
}
