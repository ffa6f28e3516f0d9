//! Client classification announced during the handshake

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client type announced to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    #[default]
    Default,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Default => "TYPE_DEFAULT",
            ClientType::One => "TYPE_ONE",
            ClientType::Two => "TYPE_TWO",
            ClientType::Three => "TYPE_THREE",
            ClientType::Four => "TYPE_FOUR",
            ClientType::Five => "TYPE_FIVE",
            ClientType::Six => "TYPE_SIX",
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority announced to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientPriority {
    Lowest,
    Low,
    #[default]
    Default,
    High,
    Highest,
}

impl ClientPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientPriority::Lowest => "PRIORITY_LOWEST",
            ClientPriority::Low => "PRIORITY_LOW",
            ClientPriority::Default => "PRIORITY_DEFAULT",
            ClientPriority::High => "PRIORITY_HIGH",
            ClientPriority::Highest => "PRIORITY_HIGHEST",
        }
    }
}

impl fmt::Display for ClientPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
