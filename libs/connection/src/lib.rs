//! # Protocol Client
//!
//! Client side of the group-communication layer. A [`SystemConnection`]
//! sits on top of any [`network::Transport`] and turns it into a session
//! with the master:
//!
//! ```text
//! caller ── send ──▶ write region ──▶ transport ──▶ master private group
//! caller ◀─ receive ◀─ queue ◀─ classify ◀─ read region ◀─ transport
//!                                  │
//!                                  ├─ health check  → reply in place
//!                                  ├─ master gone   → shutdown
//!                                  └─ kill command  → TerminateRequested
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use connection::{BookmarkStore, ConnectParams, ConnectionInfo, SystemConnection};
//! use network::MemoryBus;
//! use types::{Envelope, MessageKind, NetworkMessage, SystemClock};
//!
//! # async fn demo() -> connection::Result<()> {
//! let bus = MemoryBus::new("localhost");
//! let registry = Arc::new(ConnectionInfo::new(Arc::new(SystemClock)));
//! let client = Arc::new(SystemConnection::new(
//!     Arc::new(bus.transport()),
//!     registry.clone(),
//!     BookmarkStore::new("/tmp/bookmarks"),
//! ));
//! client
//!     .connect(ConnectParams::new("localhost", "scautopick", "PICKER"))
//!     .await?;
//! client.subscribe("PICK").await?;
//! let pick = NetworkMessage::new(MessageKind::Data, b"<pick/>".to_vec());
//! client.send("PICK", Envelope::Data(pick)).await?;
//!
//! // Publish this client's status to STATUS_GROUP every 12 s.
//! registry.start();
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

pub mod bookmark;
pub mod classify;
pub mod connection;
pub mod error;
mod handshake;
pub mod listen;
pub mod registry;
pub mod state;
pub mod stats;

pub use bookmark::{BookmarkError, BookmarkStore};
pub use classify::{classify, Action, ClassifierState, DiscardReason};
pub use connection::SystemConnection;
pub use error::{ConnectionError, Result};
pub use listen::ListenMode;
pub use registry::{
    parse_info, ConnectionInfo, ConnectionStatus, InfoCallback, Registry, DEFAULT_REPORT_DELAY,
    SAMPLES_PER_REPORT,
};
pub use state::{ConnectParams, DEFAULT_TIMEOUT_MS};
pub use stats::{MessageStat, MessageStats};

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for registry bookkeeping.
pub fn generate_connection_id() -> u64 {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}
