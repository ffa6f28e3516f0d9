//! Scripted master for end-to-end scenarios
//!
//! Joins the bus as `MASTER`, answers handshakes according to a
//! [`MasterScript`], relays published data to its destination group with a
//! sequence number and timestamp, keeps that history, and replays it on
//! archive requests.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use network::{MemoryBus, MemoryTransport, Transport, TransportError};
use types::{
    Clock, Envelope, NetworkMessage, ProtocolVersion, SchemaVersion, ServiceMessage,
    ServiceMessageType, SystemClock, MASTER_CLIENT_NAME, MASTER_GROUP,
};

/// How the master behaves during handshakes.
#[derive(Debug, Clone)]
pub struct MasterScript {
    /// Highest protocol the master speaks.
    pub protocol: ProtocolVersion,
    pub groups: Vec<String>,
    pub schema_version: Option<SchemaVersion>,
    pub server_version: Option<String>,
    /// A silent master never answers handshakes.
    pub silent: bool,
}

impl Default for MasterScript {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::V1_1,
            groups: ["PICK", "AMPLITUDE", "LOCATION", "EVENT"]
                .iter()
                .map(|g| g.to_string())
                .collect(),
            schema_version: Some(SchemaVersion::new(0, 11)),
            server_version: Some("scmaster 4.0".to_string()),
            silent: false,
        }
    }
}

impl MasterScript {
    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn speaking(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_schema_version(mut self, schema: Option<SchemaVersion>) -> Self {
        self.schema_version = schema;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

struct Shared {
    script: MasterScript,
    clock: Arc<dyn Clock>,
    sequence: AtomicI32,
    history: Mutex<Vec<NetworkMessage>>,
    received: Mutex<Vec<Envelope>>,
}

pub struct ScriptedMaster {
    transport: Arc<MemoryTransport>,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl ScriptedMaster {
    pub async fn start(bus: &MemoryBus, script: MasterScript) -> Result<Self> {
        let transport = Arc::new(bus.transport());
        transport
            .connect(bus.name(), MASTER_CLIENT_NAME)
            .await
            .context("master could not join the bus")?;
        transport
            .subscribe(MASTER_GROUP)
            .await
            .context("master could not join the control group")?;

        let shared = Arc::new(Shared {
            script,
            clock: Arc::new(SystemClock),
            sequence: AtomicI32::new(0),
            history: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
        });

        let task = tokio::spawn(serve(transport.clone(), shared.clone()));
        info!(private_group = %transport.private_group(), "Scripted master running");
        Ok(Self {
            transport,
            shared,
            task,
        })
    }

    pub fn private_group(&self) -> String {
        self.transport.private_group()
    }

    /// Data messages relayed so far, tagged.
    pub fn history(&self) -> Vec<NetworkMessage> {
        self.shared.history.lock().clone()
    }

    /// Everything that reached the master.
    pub fn received(&self) -> Vec<Envelope> {
        self.shared.received.lock().clone()
    }

    pub fn received_of(&self, kind: ServiceMessageType) -> Vec<Envelope> {
        self.received()
            .into_iter()
            .filter(|e| e.service_type() == Some(kind))
            .collect()
    }

    pub fn data_received(&self) -> usize {
        self.received().iter().filter(|e| e.is_data()).count()
    }

    /// Poll until `predicate` holds or `timeout` elapses.
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&ScriptedMaster) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if predicate(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        predicate(self)
    }

    pub async fn send_health_check(&self, target: &str) -> Result<()> {
        self.command(ServiceMessageType::StateOfHealthCommand, target)
            .await
    }

    pub async fn send_disconnect_command(&self, target: &str) -> Result<()> {
        self.command(ServiceMessageType::ClientDisconnectCommand, target)
            .await
    }

    async fn command(&self, kind: ServiceMessageType, target: &str) -> Result<()> {
        let mut envelope = Envelope::from(ServiceMessage::new(kind));
        envelope.set_private_sender_group(self.private_group());
        envelope.set_destination(target);
        self.transport
            .send(target, envelope.msg_type(), &envelope)
            .await
            .with_context(|| format!("could not send {kind:?} to {target}"))
    }

    /// Leave the bus. Members of the control group see `MasterDisconnected`
    /// when the bus announces membership changes.
    pub async fn stop(self) -> Result<()> {
        self.task.abort();
        self.transport
            .disconnect()
            .await
            .context("master could not leave the bus")
    }
}

async fn serve(transport: Arc<MemoryTransport>, shared: Arc<Shared>) {
    loop {
        let envelope = match transport.receive().await {
            Ok(envelope) => envelope,
            Err(TransportError::NotConnected) => break,
            Err(e) => {
                warn!(error = %e, "Master skipped a frame");
                continue;
            }
        };
        shared.received.lock().push(envelope.clone());

        if let Err(e) = handle(&transport, &shared, envelope).await {
            warn!(error = %e, "Master failed to handle a message");
        }
    }
    debug!("Scripted master stopped");
}

async fn handle(
    transport: &MemoryTransport,
    shared: &Shared,
    envelope: Envelope,
) -> std::result::Result<(), TransportError> {
    match envelope {
        Envelope::Data(msg) => relay(transport, shared, msg).await,
        Envelope::Service(msg) => match msg.service_type() {
            Some(ServiceMessageType::ConnectGroup) => answer_connect(transport, shared, &msg).await,
            Some(ServiceMessageType::ArchiveRequest) => replay(transport, shared, &msg).await,
            _ => Ok(()),
        },
        Envelope::Undefined(_) => Ok(()),
    }
}

async fn answer_connect(
    transport: &MemoryTransport,
    shared: &Shared,
    request: &ServiceMessage,
) -> std::result::Result<(), TransportError> {
    let script = &shared.script;
    if script.silent {
        return Ok(());
    }
    let requester = request.header().private_sender_group().to_string();

    let reply = match ProtocolVersion::parse(request.protocol_version()) {
        Some(requested) if requested <= script.protocol => {
            let payload = codec::render_reply(
                requested,
                &script.groups,
                script.schema_version,
                script.server_version.as_deref(),
            );
            let mut reply =
                ServiceMessage::new(ServiceMessageType::ConnectGroupOk).with_payload(payload);
            reply.set_protocol_version(requested.as_str());
            reply
        }
        _ => {
            let mut reply = ServiceMessage::new(ServiceMessageType::InvalidProtocol);
            reply.set_protocol_version(script.protocol.as_str());
            reply
        }
    };

    let mut reply = Envelope::from(reply);
    reply.set_private_sender_group(transport.private_group());
    reply.set_destination(requester.as_str());
    debug!(requester = %requester, msg_type = reply.msg_type(), "Answering handshake");
    transport.send(&requester, reply.msg_type(), &reply).await
}

async fn relay(
    transport: &MemoryTransport,
    shared: &Shared,
    mut msg: NetworkMessage,
) -> std::result::Result<(), TransportError> {
    let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
    msg.tag(sequence, shared.clock.unix_seconds());
    shared.history.lock().push(msg.clone());

    let group = msg.destination().to_string();
    let envelope = Envelope::Data(msg);
    transport.send(&group, envelope.msg_type(), &envelope).await
}

async fn replay(
    transport: &MemoryTransport,
    shared: &Shared,
    request: &ServiceMessage,
) -> std::result::Result<(), TransportError> {
    let requester = request.header().private_sender_group().to_string();
    let since = request.archive_sequence_number();
    let backlog: Vec<NetworkMessage> = shared
        .history
        .lock()
        .iter()
        .filter(|m| m.sequence_number() > since)
        .cloned()
        .collect();

    info!(requester = %requester, since, count = backlog.len(), "Replaying archive");
    for msg in backlog {
        let envelope = Envelope::Data(msg.into_archive());
        transport
            .send(&requester, envelope.msg_type(), &envelope)
            .await?;
    }
    Ok(())
}
