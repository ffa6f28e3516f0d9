//! Client Configuration Module
//!
//! Loads the settings a messaging client needs to open its connection.
//! Sources are layered, later ones winning:
//!
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. `SCMSG_*` environment variables (`SCMSG_PEER_GROUP=PICKER`,
//!    `SCMSG_SUBSCRIPTIONS=PICK,AMPLITUDE`)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use connection::{BookmarkStore, ConnectParams, Registry, SystemConnection, DEFAULT_TIMEOUT_MS};
use network::Transport;
use types::{ClientPriority, ClientType, SchemaVersion, DEFAULT_MAX_SCHEMA_VERSION, MASTER_GROUP};

use crate::paths;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SCMSG";

pub const DEFAULT_MASTER_ADDRESS: &str = "localhost";
pub const DEFAULT_PEER_GROUP: &str = "CLIENT_GROUP";

/// Everything needed to connect one client.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub master_address: String,
    pub client_name: String,
    pub peer_group: String,
    pub client_type: ClientType,
    pub priority: ClientPriority,
    pub timeout_ms: u64,
    pub password: String,
    pub bookmark_dir: PathBuf,

    /// Groups joined right after connecting.
    pub subscriptions: Vec<String>,
    /// Groups whose archive replays are accepted.
    pub archive_groups: Vec<String>,
    /// Ask for a replay from the bookmark before subscribing.
    pub request_archive: bool,

    pub max_schema_version: SchemaVersion,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            master_address: DEFAULT_MASTER_ADDRESS.to_string(),
            client_name: paths::program_name(),
            peer_group: DEFAULT_PEER_GROUP.to_string(),
            client_type: ClientType::default(),
            priority: ClientPriority::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            password: String::new(),
            bookmark_dir: paths::bookmark_dir(),
            subscriptions: Vec::new(),
            archive_groups: Vec::new(),
            request_archive: false,
            max_schema_version: DEFAULT_MAX_SCHEMA_VERSION,
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load defaults, then `path` if given, then `SCMSG_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Like [`ClientConfig::load`] with a custom environment prefix.
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading client config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("subscriptions")
                .with_list_parse_key("archive_groups"),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        let client: ClientConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        client.validate()?;

        debug!(
            master = %client.master_address,
            client = %client.client_name,
            peer_group = %client.peer_group,
            "Client configuration loaded"
        );
        Ok(client)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_name.trim().is_empty() {
            bail!("client_name must not be empty");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.peer_group == MASTER_GROUP {
            bail!("peer_group must not be {MASTER_GROUP}");
        }
        if let Some(group) = self
            .subscriptions
            .iter()
            .chain(&self.archive_groups)
            .find(|g| g.as_str() == MASTER_GROUP)
        {
            bail!("cannot subscribe to {group}");
        }
        Ok(())
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams::new(
            self.master_address.as_str(),
            self.client_name.as_str(),
            self.peer_group.as_str(),
        )
        .with_client(self.client_type, self.priority)
        .with_timeout_ms(self.timeout_ms)
    }

    pub fn bookmark_store(&self) -> BookmarkStore {
        BookmarkStore::new(&self.bookmark_dir)
    }

    /// A not yet connected client with password and schema cap applied.
    pub fn build_connection(
        &self,
        transport: Arc<dyn Transport>,
        registry: Arc<dyn Registry>,
    ) -> SystemConnection {
        let connection = SystemConnection::new(transport, registry, self.bookmark_store())
            .with_max_schema_version(self.max_schema_version);
        connection.set_password(self.password.as_str());
        connection
    }

    /// Connect, optionally request an archive replay, then join the
    /// configured groups.
    pub async fn open(&self, client: &Arc<SystemConnection>) -> connection::Result<()> {
        client.connect(self.connect_params()).await?;

        for group in &self.archive_groups {
            client.subscribe_archive(group)?;
        }
        if self.request_archive {
            client.archive_request().await?;
        }
        for group in &self.subscriptions {
            client.subscribe(group).await?;
        }
        Ok(())
    }
}
