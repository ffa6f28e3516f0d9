//! # Messaging Codec
//!
//! The "rules" layer between the plain data shapes in `types` and the
//! transports in `network`:
//!
//! - binary envelope framing (bincode, type-first so the shape can be peeked)
//! - the transport message size limit
//! - handshake reply payloads for protocol 1.0 and 1.1
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types  →  libs/codec  →  libs/network  →  libs/connection
//! data shapes    wire rules     transports       protocol client
//! ```
//!
//! Nothing here touches sockets or connection state.

pub mod envelope;
pub mod error;
pub mod handshake;

pub use envelope::{decode, encode, peek_type, MAX_MESSAGE_SIZE};
pub use error::{CodecError, Result};
pub use handshake::{
    ensure_default_groups, parse_group_list, parse_reply, render_reply, HandshakeReply,
    HEADER_GROUP_TAG, HEADER_SCHEMA_VERSION_TAG, HEADER_SERVER_VERSION_TAG,
};
