//! Closed set of result codes reported by connection operations

use std::fmt;

use num_enum::TryFromPrimitive;

/// Result code of a public connection operation.
///
/// Zero is success, every failure is negative so codes can be summed.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum Status {
    Success = 0,
    NotConnected = -1,
    InvalidGroup = -2,
    NetworkingError = -3,
    Timeout = -4,
    WrongServerVersion = -5,
    ConnectError = -6,
    ArchiveRequestError = -7,
    NoData = -8,
    TerminateRequested = -9,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::NotConnected => "not connected",
            Status::InvalidGroup => "invalid group",
            Status::NetworkingError => "networking error",
            Status::Timeout => "timeout",
            Status::WrongServerVersion => "wrong server version",
            Status::ConnectError => "connect error",
            Status::ArchiveRequestError => "archive request error",
            Status::NoData => "no data",
            Status::TerminateRequested => "terminate requested",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
