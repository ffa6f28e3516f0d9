//! Network message header and data payload
//!
//! `NetworkMessage` is the envelope header shared by data and service
//! messages. For data messages (`msg_type > 0`) the type packs two things:
//!
//! ```text
//! bits 0..7   message kind   (Data, Transient, Archive)
//! bits 8..    content type   (how the application encoded the payload)
//! ```
//!
//! The payload itself is opaque at this layer.

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

use crate::groups::split_private_group;

const KIND_MASK: i32 = 0x7F;
const CONTENT_SHIFT: i32 = 8;

/// Kind of a data message (low 7 bits of the wire type).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum MessageKind {
    Data = 1,
    Transient = 2,
    /// Replayed by the master in answer to an archive request.
    Archive = 3,
}

/// Payload encoding announced in the upper bits of a data message type.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum ContentType {
    Binary = 0,
    Xml = 1,
    UncompressedXml = 2,
    ImportedXml = 3,
    Bson = 4,
    UncompressedBson = 5,
    Json = 6,
    UncompressedJson = 7,
}

/// Envelope header plus payload.
///
/// Field order is the wire order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkMessage {
    msg_type: i32,
    destination: String,
    sequence_number: i32,
    timestamp: i64,
    payload: Vec<u8>,
    private_sender_group: String,
    tagged: bool,
}

impl NetworkMessage {
    /// Create a data message of the given kind with a binary content type.
    pub fn new(kind: MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        let mut msg = Self::with_type(kind as i32);
        msg.payload = payload.into();
        msg
    }

    /// Create a header with a raw wire type. Used for service headers and by
    /// transports that rebuild frames.
    pub fn with_type(msg_type: i32) -> Self {
        Self {
            msg_type,
            destination: String::new(),
            sequence_number: 0,
            timestamp: 0,
            payload: Vec::new(),
            private_sender_group: String::new(),
            tagged: false,
        }
    }

    /// Builder-style content type selection; ignored for non-data types.
    pub fn with_content_type(mut self, content: ContentType) -> Self {
        if self.msg_type > 0 {
            self.msg_type = (self.msg_type & KIND_MASK) | ((content as i32) << CONTENT_SHIFT);
        }
        self
    }

    pub fn msg_type(&self) -> i32 {
        self.msg_type
    }

    /// Kind of a data message, `None` for service or malformed types.
    pub fn message_kind(&self) -> Option<MessageKind> {
        if self.msg_type <= 0 {
            return None;
        }
        MessageKind::try_from(self.msg_type & KIND_MASK).ok()
    }

    pub fn content_type(&self) -> Option<ContentType> {
        if self.msg_type <= 0 {
            return None;
        }
        ContentType::try_from(self.msg_type >> CONTENT_SHIFT).ok()
    }

    /// True for data messages replayed by the master.
    pub fn is_archive(&self) -> bool {
        self.message_kind() == Some(MessageKind::Archive)
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn set_destination(&mut self, group: impl Into<String>) {
        self.destination = group.into();
    }

    pub fn private_sender_group(&self) -> &str {
        &self.private_sender_group
    }

    pub fn set_private_sender_group(&mut self, group: impl Into<String>) {
        self.private_sender_group = group.into();
    }

    /// Client name part of the sender's private group.
    pub fn sender_client_name(&self) -> &str {
        split_private_group(&self.private_sender_group).0
    }

    /// Host part of the sender's private group.
    pub fn sender_host(&self) -> &str {
        split_private_group(&self.private_sender_group).1
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    pub fn sequence_number(&self) -> i32 {
        self.sequence_number
    }

    /// Seconds since the Unix epoch, stamped by the master.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Stamp sequence number and timestamp. Only the first call has an effect.
    pub fn tag(&mut self, sequence_number: i32, timestamp: i64) -> bool {
        if !self.tagged {
            self.sequence_number = sequence_number;
            self.timestamp = timestamp;
            self.tagged = true;
        }
        self.tagged
    }

    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    /// Re-type a data message as an archive replay, keeping its content type.
    pub fn into_archive(mut self) -> Self {
        if self.msg_type > 0 {
            self.msg_type = (self.msg_type & !KIND_MASK) | MessageKind::Archive as i32;
        }
        self
    }
}
