//! Connect handshake with the master
//!
//! ```text
//! client                              master
//!   | ConnectGroup(version, self-info) --> MASTER_GROUP
//!   |                                    |
//!   | <-- ConnectGroupOk(groups, schema) | to #client#host
//!   | <-- InvalidProtocol(version)       | (retry once at that version)
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use network::TransportError;
use types::{Envelope, ProtocolVersion, ServiceMessage, ServiceMessageType, MASTER_GROUP};

use crate::connection::SystemConnection;
use crate::error::{ConnectionError, Result};

/// Interval between polls while waiting for the master's answer.
pub(crate) const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(200);

impl SystemConnection {
    /// Send a connect request at `version` and wait for the master's reply.
    pub(crate) async fn handshake(&self, version: ProtocolVersion) -> Result<()> {
        let self_info = self.registry.info(&self.status_snapshot());
        let (request, timeout_ms) = {
            let state = self.state.lock();
            let mut request = ServiceMessage::new(ServiceMessageType::ConnectGroup)
                .with_client(state.params.client_type, state.params.priority)
                .with_payload(self_info);
            request.set_peer_group(state.params.peer_group.as_str());
            request.set_protocol_version(version.as_str());
            request.set_password(state.password.as_str());
            request
                .header_mut()
                .set_private_sender_group(self.transport.private_group());
            request.header_mut().set_destination(MASTER_GROUP);
            (request, state.params.timeout_ms)
        };

        info!(
            address = %self.master_address(),
            version = version.as_str(),
            "Sending connect message to server"
        );
        self.transmit(MASTER_GROUP, request.into()).await?;

        let reply = self.await_handshake_reply(timeout_ms).await?;
        self.accept_handshake(reply)
    }

    async fn await_handshake_reply(&self, timeout_ms: u64) -> Result<ServiceMessage> {
        let private_group = self.transport.private_group();
        let timeout = Duration::from_millis(timeout_ms);
        let started = Instant::now();

        loop {
            if started.elapsed() >= timeout {
                error!(timeout_ms, "Timeout while waiting for acknowledgment message");
                return Err(ConnectionError::timeout("handshake", timeout_ms));
            }
            if !self.transport.poll() {
                tokio::time::sleep(HANDSHAKE_POLL_INTERVAL).await;
                continue;
            }

            let received = {
                let _guard = self.read_region.lock().await;
                self.transport.receive().await
            };
            let envelope = match received {
                Ok(envelope) => envelope,
                Err(e) if e.is_transient() => {
                    debug!(error = %e, "Skipping unreadable frame during handshake");
                    continue;
                }
                Err(TransportError::NotConnected) => return Err(ConnectionError::NotConnected),
                Err(e) => {
                    error!(error = %e, "Could not read acknowledgment message");
                    return Err(e.into());
                }
            };

            if envelope.destination() != private_group {
                debug!(destination = %envelope.destination(), "Ignoring message not addressed to us");
                continue;
            }
            match envelope {
                Envelope::Service(reply) => return Ok(reply),
                other => {
                    // Anything else addressed to us is not an answer.
                    return Err(ConnectionError::Connect(format!(
                        "unexpected message type {} during handshake",
                        other.msg_type()
                    )));
                }
            }
        }
    }

    /// Apply the master's answer to the connection state.
    fn accept_handshake(&self, reply: ServiceMessage) -> Result<()> {
        match reply.service_type() {
            Some(ServiceMessageType::ConnectGroupOk) => {}
            Some(ServiceMessageType::InvalidProtocol) => {
                info!(
                    master = reply.protocol_version(),
                    client = ProtocolVersion::LATEST.as_str(),
                    "Master protocol is not compatible with client"
                );
                let supported = Some(reply.protocol_version().to_string())
                    .filter(|v| !v.is_empty());
                return Err(ConnectionError::WrongServerVersion { supported });
            }
            _ => {
                info!(msg_type = reply.header().msg_type(), "Could not connect to the master");
                return Err(ConnectionError::Connect(format!(
                    "master answered with message type {}",
                    reply.header().msg_type()
                )));
            }
        }

        let Some(version) = ProtocolVersion::parse(reply.protocol_version()) else {
            error!(version = reply.protocol_version(), "Unknown protocol version in reply");
            return Err(ConnectionError::WrongServerVersion { supported: None });
        };

        let mut parsed = codec::parse_reply(version, reply.header().payload());
        codec::ensure_default_groups(&mut parsed.groups);

        let mut state = self.state.lock();
        state.private_master_group = self.transport.group_of_last_sender();
        state.groups = parsed.groups;

        let negotiated = parsed.schema_version.unwrap_or_default();
        state.schema_version = if negotiated > state.max_schema_version {
            info!(
                offered = %negotiated,
                max = %state.max_schema_version,
                "Outgoing messages are encoded to match the highest supported schema version"
            );
            state.max_schema_version
        } else {
            negotiated
        };
        if version == ProtocolVersion::V1_1 && parsed.schema_version.is_none() {
            warn!("Master did not announce a schema version");
        }

        debug!(
            groups = ?state.groups,
            schema_version = %state.schema_version,
            private_master_group = %state.private_master_group,
            "Handshake complete"
        );
        Ok(())
    }
}
