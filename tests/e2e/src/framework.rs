//! Test bed shared by the scenarios
//!
//! One in-memory bus with membership announcements, one registry, and one
//! bookmark directory. Every client gets its own transport session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use client_config::ClientConfig;
use connection::{ConnectParams, ConnectionInfo, SystemConnection};
use types::{Envelope, SystemClock};

use crate::fixtures::{MasterScript, ScriptedMaster};

pub const BUS: &str = "e2e-bus";

pub struct TestBed {
    pub bus: network::MemoryBus,
    pub registry: Arc<ConnectionInfo>,
    bookmarks: TempDir,
}

impl TestBed {
    pub fn new() -> Result<Self> {
        Ok(Self {
            bus: network::MemoryBus::new(BUS).with_membership_events(true),
            registry: Arc::new(ConnectionInfo::new(Arc::new(SystemClock))),
            bookmarks: tempfile::tempdir()?,
        })
    }

    pub async fn master(&self, script: MasterScript) -> Result<ScriptedMaster> {
        ScriptedMaster::start(&self.bus, script).await
    }

    pub fn bookmark_dir(&self) -> &Path {
        self.bookmarks.path()
    }

    /// Configuration for a client on this bus.
    pub fn config(&self, client_name: &str, peer_group: &str) -> ClientConfig {
        ClientConfig {
            master_address: BUS.to_string(),
            client_name: client_name.to_string(),
            peer_group: peer_group.to_string(),
            timeout_ms: 2000,
            bookmark_dir: self.bookmark_dir().to_path_buf(),
            ..ClientConfig::default()
        }
    }

    /// An unconnected client built from `config`.
    pub fn client(&self, config: &ClientConfig) -> Arc<SystemConnection> {
        Arc::new(config.build_connection(Arc::new(self.bus.transport()), self.registry.clone()))
    }

    pub fn params(&self, client_name: &str, peer_group: &str) -> ConnectParams {
        self.config(client_name, peer_group).connect_params()
    }

    /// Build a client from `config` and run its connect sequence.
    pub async fn open(&self, config: &ClientConfig) -> Result<Arc<SystemConnection>> {
        let client = self.client(config);
        config.open(&client).await?;
        Ok(client)
    }
}

/// Blocking receive bounded by `timeout`; skips control traffic.
pub async fn next_data(client: &SystemConnection, timeout: Duration) -> Result<Envelope> {
    tokio::time::timeout(timeout, read_data(client)).await?
}

async fn read_data(client: &SystemConnection) -> Result<Envelope> {
    loop {
        let envelope = client.receive(true).await?;
        if envelope.is_data() {
            return Ok(envelope);
        }
    }
}
