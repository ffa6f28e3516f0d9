//! Connection parameters and mutable connection state

use std::collections::BTreeSet;

use types::{is_builtin_group, ClientPriority, ClientType, SchemaVersion, DEFAULT_MAX_SCHEMA_VERSION};

pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Everything `connect` needs; kept so `reconnect` can repeat it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub master_address: String,
    pub client_name: String,
    pub peer_group: String,
    pub client_type: ClientType,
    pub priority: ClientPriority,
    pub timeout_ms: u64,
}

impl ConnectParams {
    pub fn new(
        master_address: impl Into<String>,
        client_name: impl Into<String>,
        peer_group: impl Into<String>,
    ) -> Self {
        Self {
            master_address: master_address.into(),
            client_name: client_name.into(),
            peer_group: peer_group.into(),
            client_type: ClientType::default(),
            priority: ClientPriority::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub fn with_client(mut self, client_type: ClientType, priority: ClientPriority) -> Self {
        self.client_type = client_type;
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self::new("", "", "")
    }
}

/// Mutable state shared by the read and write paths.
///
/// `subscriptions` and `archive_groups` outlive a disconnect; the rest is
/// reset whenever the connection goes down.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub params: ConnectParams,
    pub password: String,
    pub schema_version: SchemaVersion,
    pub max_schema_version: SchemaVersion,
    pub private_master_group: String,
    /// Advertised by the master, in its order.
    pub groups: Vec<String>,
    pub subscriptions: BTreeSet<String>,
    pub archive_groups: BTreeSet<String>,
    pub connected: bool,
    pub archive_requested: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            params: ConnectParams::default(),
            password: String::new(),
            schema_version: SchemaVersion::default(),
            max_schema_version: DEFAULT_MAX_SCHEMA_VERSION,
            private_master_group: String::new(),
            groups: Vec::new(),
            subscriptions: BTreeSet::new(),
            archive_groups: BTreeSet::new(),
            connected: false,
            archive_requested: false,
        }
    }
}

impl ConnectionState {
    /// Advertised by the master or one of the always-allowed built-ins.
    pub fn is_group_available(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group) || is_builtin_group(group)
    }
}
