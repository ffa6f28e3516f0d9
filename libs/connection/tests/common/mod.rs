//! Common test utilities for the protocol client
//!
//! `RecordingTransport` is a scripted stand-in for a master: it records every
//! call the client makes, answers the connect handshake according to a
//! [`HandshakeScript`], and lets tests inject inbound envelopes.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;

use connection::{BookmarkStore, ConnectParams, ConnectionInfo, SystemConnection};
use network::{Transport, TransportError};
use types::{
    Envelope, ManualClock, MessageKind, NetworkMessage, ProtocolVersion, SchemaVersion,
    ServiceMessage, ServiceMessageType,
};

pub const ADDRESS: &str = "test-master";
pub const CLIENT: &str = "tester";
pub const PRIVATE_GROUP: &str = "#tester#test-master";
pub const MASTER_PRIVATE_GROUP: &str = "#MASTER#test-master";

/// How the fake master answers `ConnectGroup`.
#[derive(Debug, Clone)]
pub enum HandshakeScript {
    /// Accept at whatever version was requested.
    Accept {
        groups: Vec<String>,
        schema_version: Option<SchemaVersion>,
    },
    /// Only speak `supported`; accept requests at that version.
    OnlySpeaks {
        supported: String,
        groups: Vec<String>,
    },
    /// Never answer.
    Silent,
    /// Answer with `ConnectGroupReject`.
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    pub group: String,
    pub msg_type: i32,
    pub envelope: Envelope,
}

#[derive(Default)]
struct Calls {
    connects: Vec<(String, String)>,
    disconnects: usize,
    subscribes: Vec<String>,
    unsubscribes: Vec<String>,
    sent: Vec<SentFrame>,
}

pub struct RecordingTransport {
    script: Mutex<HandshakeScript>,
    connected: Mutex<bool>,
    calls: Mutex<Calls>,
    inbound: Mutex<VecDeque<(String, Result<Envelope, TransportError>)>>,
    notify: Notify,
    last_sender: Mutex<String>,
    sequence_number: AtomicI64,
    chatter: AtomicBool,
}

impl RecordingTransport {
    pub fn new(script: HandshakeScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            connected: Mutex::new(false),
            calls: Mutex::new(Calls::default()),
            inbound: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            last_sender: Mutex::new(String::new()),
            sequence_number: AtomicI64::new(0),
            chatter: AtomicBool::new(false),
        })
    }

    pub fn accepting(groups: &[&str]) -> Arc<Self> {
        Self::new(HandshakeScript::Accept {
            groups: groups.iter().map(|g| g.to_string()).collect(),
            schema_version: Some(SchemaVersion::new(0, 10)),
        })
    }

    pub fn set_script(&self, script: HandshakeScript) {
        *self.script.lock() = script;
    }

    /// Queue an envelope as if `sender` had published it.
    pub fn inject(&self, sender: &str, envelope: Envelope) {
        self.inbound
            .lock()
            .push_back((sender.to_string(), Ok(envelope)));
        self.notify.notify_one();
    }

    pub fn inject_error(&self, error: TransportError) {
        self.inbound.lock().push_back((String::new(), Err(error)));
        self.notify.notify_one();
    }

    /// Keep a stream of traffic for somebody else flowing: `poll()` is always
    /// true and every `receive()` yields a stray envelope after 50 ms.
    pub fn set_chatter(&self, enabled: bool) {
        self.chatter.store(enabled, Ordering::Relaxed);
    }

    /// Simulate the master dropping the session.
    pub fn sever(&self) {
        *self.connected.lock() = false;
        self.notify.notify_waiters();
    }

    pub fn connects(&self) -> Vec<(String, String)> {
        self.calls.lock().connects.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.calls.lock().disconnects
    }

    pub fn subscribes(&self) -> Vec<String> {
        self.calls.lock().subscribes.clone()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.calls.lock().unsubscribes.clone()
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.calls.lock().sent.clone()
    }

    /// Sent frames other than handshake requests.
    pub fn sent_after_handshake(&self) -> Vec<SentFrame> {
        self.sent()
            .into_iter()
            .filter(|f| f.msg_type != ServiceMessageType::ConnectGroup.code())
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.inbound.lock().len()
    }

    fn answer_handshake(&self, request: &ServiceMessage) {
        let requested = request.protocol_version().to_string();
        let reply = match self.script.lock().clone() {
            HandshakeScript::Silent => return,
            HandshakeScript::Reject => ServiceMessage::new(ServiceMessageType::ConnectGroupReject),
            HandshakeScript::Accept {
                groups,
                schema_version,
            } => ok_reply(&requested, &groups, schema_version),
            HandshakeScript::OnlySpeaks { supported, groups } => {
                if supported == requested {
                    ok_reply(&requested, &groups, None)
                } else {
                    let mut reply = ServiceMessage::new(ServiceMessageType::InvalidProtocol);
                    reply.set_protocol_version(supported);
                    reply
                }
            }
        };
        let mut reply = Envelope::from(reply);
        reply.set_destination(request.header().private_sender_group());
        reply.set_private_sender_group(MASTER_PRIVATE_GROUP);
        self.inject(MASTER_PRIVATE_GROUP, reply);
    }
}

fn ok_reply(version: &str, groups: &[String], schema: Option<SchemaVersion>) -> ServiceMessage {
    let protocol = ProtocolVersion::parse(version).unwrap_or(ProtocolVersion::V1_1);
    let payload = codec::render_reply(protocol, groups, schema, Some("test 1.0"));
    let mut reply = ServiceMessage::new(ServiceMessageType::ConnectGroupOk).with_payload(payload);
    reply.set_protocol_version(version);
    reply
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect(&self, address: &str, client_name: &str) -> network::Result<()> {
        self.calls
            .lock()
            .connects
            .push((address.to_string(), client_name.to_string()));
        if address != ADDRESS {
            return Err(TransportError::refused(address, "unknown master"));
        }
        *self.connected.lock() = true;
        Ok(())
    }

    async fn disconnect(&self) -> network::Result<()> {
        self.calls.lock().disconnects += 1;
        *self.connected.lock() = false;
        self.inbound.lock().clear();
        self.notify.notify_waiters();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn subscribe(&self, group: &str) -> network::Result<()> {
        self.calls.lock().subscribes.push(group.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, group: &str) -> network::Result<()> {
        self.calls.lock().unsubscribes.push(group.to_string());
        Ok(())
    }

    async fn send(&self, group: &str, msg_type: i32, envelope: &Envelope) -> network::Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.calls.lock().sent.push(SentFrame {
            group: group.to_string(),
            msg_type,
            envelope: envelope.clone(),
        });
        self.sequence_number.fetch_add(1, Ordering::Relaxed);
        if let Envelope::Service(request) = envelope {
            if request.service_type() == Some(ServiceMessageType::ConnectGroup) {
                self.answer_handshake(request);
            }
        }
        Ok(())
    }

    async fn receive(&self) -> network::Result<Envelope> {
        if self.chatter.load(Ordering::Relaxed) && self.is_connected() {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut stray = control(ServiceMessageType::ConnectGroupOk, MASTER_PRIVATE_GROUP);
            stray.set_destination("#someone#else");
            return Ok(stray);
        }
        loop {
            let notified = self.notify.notified();
            if !self.is_connected() {
                return Err(TransportError::NotConnected);
            }
            let next = self.inbound.lock().pop_front();
            if let Some((sender, result)) = next {
                *self.last_sender.lock() = sender;
                return result;
            }
            notified.await;
        }
    }

    fn poll(&self) -> bool {
        self.chatter.load(Ordering::Relaxed) || !self.inbound.lock().is_empty()
    }

    fn private_group(&self) -> String {
        if self.is_connected() {
            PRIVATE_GROUP.to_string()
        } else {
            String::new()
        }
    }

    fn group_of_last_sender(&self) -> String {
        self.last_sender.lock().clone()
    }

    fn sequence_number(&self) -> i64 {
        self.sequence_number.load(Ordering::Relaxed)
    }

    fn set_sequence_number(&self, sequence_number: i64) {
        self.sequence_number.store(sequence_number, Ordering::Relaxed);
    }
}

/// Client wired to a recording transport, plus everything a test inspects.
pub struct Harness {
    pub transport: Arc<RecordingTransport>,
    pub clock: Arc<ManualClock>,
    pub registry: Arc<ConnectionInfo>,
    pub client: Arc<SystemConnection>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(transport: Arc<RecordingTransport>) -> Self {
        Self::with_report_delay(transport, connection::DEFAULT_REPORT_DELAY)
    }

    /// Like `new`, with the registry sampling every `delay`.
    pub fn with_report_delay(transport: Arc<RecordingTransport>, delay: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let registry = Arc::new(ConnectionInfo::new(clock.clone()).with_report_delay(delay));
        let client = Arc::new(SystemConnection::new(
            transport.clone(),
            registry.clone(),
            BookmarkStore::new(dir.path()),
        ));
        Self {
            transport,
            clock,
            registry,
            client,
            dir,
        }
    }

    pub async fn connected(groups: &[&str]) -> Self {
        let harness = Self::new(RecordingTransport::accepting(groups));
        harness.client.connect(params()).await.unwrap();
        harness
    }
}

pub fn params() -> ConnectParams {
    ConnectParams::new(ADDRESS, CLIENT, "PICKER").with_timeout_ms(1000)
}

pub fn data(payload: &str, sender: &str, destination: &str) -> Envelope {
    let mut env = Envelope::Data(NetworkMessage::new(
        MessageKind::Data,
        payload.as_bytes().to_vec(),
    ));
    env.set_private_sender_group(sender);
    env.set_destination(destination);
    env
}

pub fn archived(payload: &str, sender: &str, destination: &str) -> Envelope {
    let mut msg = NetworkMessage::new(MessageKind::Archive, payload.as_bytes().to_vec());
    msg.set_private_sender_group(sender);
    msg.set_destination(destination);
    Envelope::Data(msg)
}

pub fn control(kind: ServiceMessageType, sender: &str) -> Envelope {
    let mut env = Envelope::from(ServiceMessage::new(kind));
    env.set_private_sender_group(sender);
    env.set_destination(PRIVATE_GROUP);
    env
}
