//! Network Infrastructure
//!
//! The transport contract the protocol client is written against, its error
//! type, and an in-process implementation:
//!
//! - [`Transport`]: session, group membership, multicast send, blocking receive
//! - [`TransportError`]: fatal vs. transient transport failures
//! - [`MemoryBus`] / [`MemoryTransport`]: a daemon-like bus inside one process,
//!   used by tests, demos and single-process deployments

pub mod error;
pub mod memory;
pub mod transport;

// Re-export commonly used types
pub use error::{Result, TransportError};
pub use memory::{MemoryBus, MemoryTransport};
pub use transport::Transport;
