//! Tagged union over the three envelope shapes

use serde::{Deserialize, Serialize};

use crate::message::NetworkMessage;
use crate::service::{ServiceMessage, ServiceMessageType};

/// One unit of traffic between client and master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// Application payload, `type > 0`.
    Data(NetworkMessage),
    /// Control traffic, `type < 0`.
    Service(ServiceMessage),
    /// `type == 0`.
    Undefined(NetworkMessage),
}

impl Envelope {
    pub fn msg_type(&self) -> i32 {
        self.header().msg_type()
    }

    pub fn header(&self) -> &NetworkMessage {
        match self {
            Envelope::Data(msg) | Envelope::Undefined(msg) => msg,
            Envelope::Service(msg) => msg.header(),
        }
    }

    pub fn header_mut(&mut self) -> &mut NetworkMessage {
        match self {
            Envelope::Data(msg) | Envelope::Undefined(msg) => msg,
            Envelope::Service(msg) => msg.header_mut(),
        }
    }

    pub fn destination(&self) -> &str {
        self.header().destination()
    }

    pub fn set_destination(&mut self, group: impl Into<String>) {
        self.header_mut().set_destination(group);
    }

    pub fn private_sender_group(&self) -> &str {
        self.header().private_sender_group()
    }

    pub fn set_private_sender_group(&mut self, group: impl Into<String>) {
        self.header_mut().set_private_sender_group(group);
    }

    pub fn payload(&self) -> &[u8] {
        self.header().payload()
    }

    /// Control subtype, `None` for data/undefined and for unknown negatives.
    pub fn service_type(&self) -> Option<ServiceMessageType> {
        match self {
            Envelope::Service(msg) => msg.service_type(),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&NetworkMessage> {
        match self {
            Envelope::Data(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceMessage> {
        match self {
            Envelope::Service(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn into_service(self) -> Option<ServiceMessage> {
        match self {
            Envelope::Service(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Envelope::Data(_))
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Envelope::Service(_))
    }
}

impl From<NetworkMessage> for Envelope {
    fn from(msg: NetworkMessage) -> Self {
        match msg.msg_type() {
            t if t > 0 => Envelope::Data(msg),
            0 => Envelope::Undefined(msg),
            _ => Envelope::Service(ServiceMessage::from_header(msg)),
        }
    }
}

impl From<ServiceMessage> for Envelope {
    fn from(msg: ServiceMessage) -> Self {
        Envelope::Service(msg)
    }
}
