//! # Messaging Types
//!
//! Shared vocabulary for the messaging client: the envelope shapes exchanged
//! with the master, the closed set of control subtypes, reserved group names,
//! client classification, protocol and schema versions, and the closed set of
//! status codes every public operation reports.
//!
//! ## Envelope Shapes
//!
//! ```text
//! Envelope::Data(NetworkMessage)       type > 0   application payload
//! Envelope::Service(ServiceMessage)    type < 0   protocol control traffic
//! Envelope::Undefined(NetworkMessage)  type == 0  never produced by a sane peer
//! ```
//!
//! The sign of the wire `type` picks the variant once, at construction or
//! decode time; an envelope never changes variant afterwards.

pub mod client;
pub mod envelope;
pub mod groups;
pub mod message;
pub mod service;
pub mod status;
pub mod time;
pub mod version;

pub use client::{ClientPriority, ClientType};
pub use envelope::Envelope;
pub use groups::{
    is_builtin_group, split_private_group, ADMIN_GROUP, IMPORT_GROUP, LISTENER_GROUP,
    MASTER_CLIENT_NAME, MASTER_GROUP, STATUS_GROUP,
};
pub use message::{ContentType, MessageKind, NetworkMessage};
pub use service::{ServiceMessage, ServiceMessageType};
pub use status::Status;
pub use time::{Clock, ManualClock, SystemClock};
pub use version::{ProtocolVersion, SchemaVersion, SchemaVersionError, DEFAULT_MAX_SCHEMA_VERSION};
