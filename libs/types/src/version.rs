//! Protocol and schema versions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest schema version this client understands unless configured otherwise.
pub const DEFAULT_MAX_SCHEMA_VERSION: SchemaVersion = SchemaVersion::new(0, 11);

/// Handshake protocol spoken with the master.
///
/// `V1_1` is tried first. A master that only speaks 1.0 answers with
/// `InvalidProtocol` naming "1.0" and the client retries once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V1_0,
    V1_1,
}

impl ProtocolVersion {
    pub const LATEST: ProtocolVersion = ProtocolVersion::V1_1;

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "1.0",
            ProtocolVersion::V1_1 => "1.1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1.0" => Some(ProtocolVersion::V1_0),
            "1.1" => Some(ProtocolVersion::V1_1),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `major.minor` schema version. Ordered numerically, so 0.11 > 0.9.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    pub major: u16,
    pub minor: u16,
}

impl SchemaVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaVersionError {
    #[error("empty schema version")]
    Empty,

    #[error("invalid schema version '{value}': expected <major>.<minor>")]
    Malformed { value: String },
}

impl FromStr for SchemaVersion {
    type Err = SchemaVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SchemaVersionError::Empty);
        }
        let malformed = || SchemaVersionError::Malformed {
            value: s.to_string(),
        };
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s, "0"),
        };
        Ok(Self {
            major: major.parse().map_err(|_| malformed())?,
            minor: minor.parse().map_err(|_| malformed())?,
        })
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = SchemaVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(version: SchemaVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
