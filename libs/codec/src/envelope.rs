//! Binary envelope framing
//!
//! ```text
//! [msg_type: i32 LE][destination][sequence_number][timestamp][payload]
//! [private_sender_group][tagged]  (+ service fields when msg_type < 0)
//! ```
//!
//! The body is bincode. Because `msg_type` is the first header field, the
//! decoder can peek the leading four bytes to pick the shape before
//! deserializing anything.

use types::{Envelope, NetworkMessage, ServiceMessage};

use crate::error::{CodecError, Result};

/// Largest encoded envelope a transport will carry (128 KiB).
pub const MAX_MESSAGE_SIZE: usize = 131_072;

const TYPE_FIELD_LEN: usize = 4;

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let bytes = match envelope {
        Envelope::Data(msg) | Envelope::Undefined(msg) => bincode::serialize(msg)?,
        Envelope::Service(msg) => bincode::serialize(msg)?,
    };
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::oversized(bytes.len(), MAX_MESSAGE_SIZE));
    }
    Ok(bytes)
}

/// Read the wire type without decoding the body.
pub fn peek_type(bytes: &[u8]) -> Result<i32> {
    match bytes.get(..TYPE_FIELD_LEN) {
        Some(&[a, b, c, d]) => Ok(i32::from_le_bytes([a, b, c, d])),
        _ => Err(CodecError::truncated(TYPE_FIELD_LEN, bytes.len())),
    }
}

pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::oversized(bytes.len(), MAX_MESSAGE_SIZE));
    }
    let envelope = if peek_type(bytes)? < 0 {
        Envelope::Service(bincode::deserialize::<ServiceMessage>(bytes)?)
    } else {
        Envelope::from(bincode::deserialize::<NetworkMessage>(bytes)?)
    };
    Ok(envelope)
}
