//! Control messages exchanged with the master
//!
//! A service message is a `NetworkMessage` header with a negative type plus a
//! fixed set of handshake and archive fields. Only the subtypes listed in
//! [`ServiceMessageType`] exist; anything else with a negative type decodes
//! fine but is discarded by the read path.

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

use crate::client::{ClientPriority, ClientType};
use crate::message::NetworkMessage;

/// Closed set of control subtypes. Values are contiguous from -100.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum ServiceMessageType {
    ConnectGroup = -100,
    ConnectGroupOk = -99,
    ConnectGroupReject = -98,
    /// Handshake refused; payload names the highest version the master speaks.
    InvalidProtocol = -97,
    ClientDisconnected = -96,
    MasterDisconnected = -95,
    ClientDisconnectCommand = -94,
    JoinGroup = -93,
    LeaveGroup = -92,
    StateOfHealthCommand = -91,
    StateOfHealthResponse = -90,
    ListConnectedClientsCommand = -89,
    ListConnectedClientsResponse = -88,
    RejectedCommand = -87,
    AdminReject = -86,
    ArchiveRequest = -85,
    InvalidArchiveRequest = -84,
}

impl ServiceMessageType {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Header plus handshake / archive fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
    header: NetworkMessage,
    protocol_version: String,
    client_type: ClientType,
    client_priority: ClientPriority,
    archive_sequence_number: i32,
    archive_timestamp: i64,
    password: String,
    peer_group: String,
}

impl ServiceMessage {
    pub fn new(service_type: ServiceMessageType) -> Self {
        Self::with_raw_type(service_type.code())
    }

    /// Service header with a raw (possibly unknown) negative type.
    pub fn with_raw_type(msg_type: i32) -> Self {
        Self {
            header: NetworkMessage::with_type(msg_type),
            protocol_version: String::new(),
            client_type: ClientType::default(),
            client_priority: ClientPriority::default(),
            archive_sequence_number: -1,
            archive_timestamp: 0,
            password: String::new(),
            peer_group: String::new(),
        }
    }

    /// Wrap an existing header, keeping its routing fields.
    pub fn from_header(header: NetworkMessage) -> Self {
        let mut msg = Self::with_raw_type(header.msg_type());
        msg.header = header;
        msg
    }

    pub fn with_client(mut self, client_type: ClientType, priority: ClientPriority) -> Self {
        self.client_type = client_type;
        self.client_priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.header.set_payload(payload);
        self
    }

    /// `None` for negative types outside the closed set.
    pub fn service_type(&self) -> Option<ServiceMessageType> {
        ServiceMessageType::try_from(self.header.msg_type()).ok()
    }

    pub fn header(&self) -> &NetworkMessage {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut NetworkMessage {
        &mut self.header
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn set_protocol_version(&mut self, version: impl Into<String>) {
        self.protocol_version = version.into();
    }

    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    pub fn client_priority(&self) -> ClientPriority {
        self.client_priority
    }

    pub fn archive_sequence_number(&self) -> i32 {
        self.archive_sequence_number
    }

    pub fn archive_timestamp(&self) -> i64 {
        self.archive_timestamp
    }

    /// Position to resume replay from, as taken from a bookmarked envelope.
    pub fn set_archive_position(&mut self, sequence_number: i32, timestamp: i64) {
        self.archive_sequence_number = sequence_number;
        self.archive_timestamp = timestamp;
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    pub fn peer_group(&self) -> &str {
        &self.peer_group
    }

    pub fn set_peer_group(&mut self, group: impl Into<String>) {
        self.peer_group = group.into();
    }
}
