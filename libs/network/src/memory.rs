//! In-process group-communication bus
//!
//! `MemoryBus` plays the role of the group-communication daemon for clients
//! living in the same process: it names sessions, tracks group membership and
//! fans frames out to mailboxes. Frames travel as encoded bytes so everything
//! that crosses the bus goes through the codec, exactly as on a real wire.
//!
//! ```text
//! MemoryTransport ──send──▶ MemoryBus ──fan out──▶ Mailbox ──receive──▶ MemoryTransport
//!  "#scevent#bus"            groups:                (one per session)
//!                            PICK → {#a#bus, #b#bus}
//! ```
//!
//! Semantics follow a Spread daemon: a multicast reaches every member of the
//! group including the sender, a private group reaches exactly one session,
//! and sending to a group nobody joined is not an error.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};
use types::{Envelope, ServiceMessage, ServiceMessageType, MASTER_CLIENT_NAME};

use crate::{Result, Transport, TransportError};

struct Frame {
    sender: String,
    bytes: Bytes,
}

struct Mailbox {
    frames: Mutex<VecDeque<Frame>>,
    notify: Notify,
    open: AtomicBool,
}

impl Mailbox {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            open: AtomicBool::new(true),
        })
    }

    fn push(&self, frame: Frame) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        self.frames.lock().push_back(frame);
        self.notify.notify_waiters();
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.frames.lock().clear();
        self.notify.notify_waiters();
    }

    async fn next(&self) -> Option<Frame> {
        loop {
            // Registered before checking so a push in between still wakes us.
            let notified = self.notify.notified();
            let frame = self.frames.lock().pop_front();
            if frame.is_some() {
                return frame;
            }
            if !self.open.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    fn has_frames(&self) -> bool {
        !self.frames.lock().is_empty()
    }
}

struct Member {
    client_name: String,
    mailbox: Arc<Mailbox>,
}

#[derive(Default)]
struct BusState {
    /// Keyed by private group.
    members: HashMap<String, Member>,
    groups: HashMap<String, BTreeSet<String>>,
}

struct BusInner {
    name: String,
    membership_events: AtomicBool,
    state: Mutex<BusState>,
}

/// Named in-process bus. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name: name.into(),
                membership_events: AtomicBool::new(false),
                state: Mutex::new(BusState::default()),
            }),
        }
    }

    /// Deliver join/leave/disconnect notifications to group members.
    pub fn with_membership_events(self, enabled: bool) -> Self {
        self.inner.membership_events.store(enabled, Ordering::Relaxed);
        self
    }

    /// The address clients connect to.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A fresh, unconnected transport on this bus.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport::new(self.clone())
    }

    /// Private groups of all connected sessions, sorted.
    pub fn members(&self) -> Vec<String> {
        let mut members: Vec<String> = self.inner.state.lock().members.keys().cloned().collect();
        members.sort();
        members
    }

    /// Private groups currently joined to `group`.
    pub fn group_members(&self, group: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .groups
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn events_enabled(&self) -> bool {
        self.inner.membership_events.load(Ordering::Relaxed)
    }

    fn attach(&self, client_name: &str) -> Result<(String, Arc<Mailbox>)> {
        if client_name.is_empty() {
            return Err(TransportError::refused(self.name(), "empty client name"));
        }
        let private_group = format!("#{}#{}", client_name, self.name());
        let mut state = self.inner.state.lock();
        if state.members.contains_key(&private_group) {
            return Err(TransportError::refused(
                self.name(),
                format!("client name '{client_name}' already in use"),
            ));
        }
        let mailbox = Mailbox::new();
        state.members.insert(
            private_group.clone(),
            Member {
                client_name: client_name.to_string(),
                mailbox: mailbox.clone(),
            },
        );
        Ok((private_group, mailbox))
    }

    fn detach(&self, private_group: &str) {
        let (member, left_groups) = {
            let mut state = self.inner.state.lock();
            let member = state.members.remove(private_group);
            let mut left = Vec::new();
            for (group, members) in state.groups.iter_mut() {
                if members.remove(private_group) {
                    left.push(group.clone());
                }
            }
            state.groups.retain(|_, members| !members.is_empty());
            (member, left)
        };

        let Some(member) = member else {
            return;
        };
        member.mailbox.close();

        if self.events_enabled() {
            let msg_type = if member.client_name == MASTER_CLIENT_NAME {
                ServiceMessageType::MasterDisconnected
            } else {
                ServiceMessageType::ClientDisconnected
            };
            for group in left_groups {
                let mut env: Envelope =
                    ServiceMessage::new(msg_type).with_payload(private_group.as_bytes()).into();
                env.set_private_sender_group(private_group);
                env.set_destination(group.as_str());
                self.notify_group(&group, env);
            }
        }
    }

    fn join(&self, private_group: &str, group: &str) -> bool {
        let joined = self
            .inner
            .state
            .lock()
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(private_group.to_string());

        if joined && self.events_enabled() {
            // ?<group>&<joiner>?<member0>&<member1>&...
            let members = self.group_members(group).join("&");
            let payload = format!("?{group}&{private_group}?{members}");
            let mut env: Envelope =
                ServiceMessage::new(ServiceMessageType::JoinGroup).with_payload(payload).into();
            env.set_private_sender_group(private_group);
            env.set_destination(group);
            self.notify_group(group, env);
        }
        joined
    }

    fn leave(&self, private_group: &str, group: &str) -> bool {
        let left = {
            let mut state = self.inner.state.lock();
            let left = state
                .groups
                .get_mut(group)
                .map(|members| members.remove(private_group))
                .unwrap_or(false);
            state.groups.retain(|_, members| !members.is_empty());
            left
        };

        if left && self.events_enabled() {
            let payload = format!("?{group}&{private_group}?");
            let mut env: Envelope =
                ServiceMessage::new(ServiceMessageType::LeaveGroup).with_payload(payload).into();
            env.set_private_sender_group(private_group);
            env.set_destination(group);
            self.notify_group(group, env);
        }
        left
    }

    /// Membership notifications come from the group itself, like a daemon's.
    fn notify_group(&self, group: &str, envelope: Envelope) {
        match codec::encode(&envelope) {
            Ok(bytes) => self.deliver(group, group, Bytes::from(bytes)),
            Err(e) => warn!(group = %group, error = %e, "Dropping membership notification"),
        }
    }

    fn deliver(&self, target: &str, sender: &str, bytes: Bytes) {
        let state = self.inner.state.lock();
        if let Some(member) = state.members.get(target) {
            member.mailbox.push(Frame {
                sender: sender.to_string(),
                bytes,
            });
            return;
        }
        match state.groups.get(target) {
            Some(members) => {
                for member in members.iter().filter_map(|m| state.members.get(m)) {
                    member.mailbox.push(Frame {
                        sender: sender.to_string(),
                        bytes: bytes.clone(),
                    });
                }
            }
            None => trace!(group = %target, "No members, frame dropped"),
        }
    }
}

struct Session {
    private_group: String,
    mailbox: Arc<Mailbox>,
}

/// One client session on a [`MemoryBus`].
pub struct MemoryTransport {
    bus: MemoryBus,
    session: Mutex<Option<Session>>,
    sequence_number: AtomicI64,
    last_sender: Mutex<String>,
}

impl MemoryTransport {
    pub fn new(bus: MemoryBus) -> Self {
        Self {
            bus,
            session: Mutex::new(None),
            sequence_number: AtomicI64::new(0),
            last_sender: Mutex::new(String::new()),
        }
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    fn private_group_checked(&self) -> Result<String> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.private_group.clone())
            .ok_or(TransportError::NotConnected)
    }

    fn mailbox(&self) -> Result<Arc<Mailbox>> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.mailbox.clone())
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, address: &str, client_name: &str) -> Result<()> {
        if address != self.bus.name() {
            return Err(TransportError::refused(address, "no such bus"));
        }
        if self.session.lock().is_some() {
            return Err(TransportError::refused(address, "session already open"));
        }
        let (private_group, mailbox) = self.bus.attach(client_name)?;
        debug!(private_group = %private_group, "Memory transport connected");
        *self.session.lock() = Some(Session {
            private_group,
            mailbox,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let session = self.session.lock().take().ok_or(TransportError::NotConnected)?;
        debug!(private_group = %session.private_group, "Memory transport disconnected");
        self.bus.detach(&session.private_group);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }

    async fn subscribe(&self, group: &str) -> Result<()> {
        if group.is_empty() {
            return Err(TransportError::invalid_group(group));
        }
        let private_group = self.private_group_checked()?;
        self.bus.join(&private_group, group);
        Ok(())
    }

    async fn unsubscribe(&self, group: &str) -> Result<()> {
        if group.is_empty() {
            return Err(TransportError::invalid_group(group));
        }
        let private_group = self.private_group_checked()?;
        self.bus.leave(&private_group, group);
        Ok(())
    }

    async fn send(&self, group: &str, msg_type: i32, envelope: &Envelope) -> Result<()> {
        if group.is_empty() {
            return Err(TransportError::invalid_group(group));
        }
        let private_group = self.private_group_checked()?;
        let bytes = codec::encode(envelope)?;
        trace!(group = %group, msg_type, size = bytes.len(), "Sending frame");
        self.bus.deliver(group, &private_group, Bytes::from(bytes));
        self.sequence_number.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn receive(&self) -> Result<Envelope> {
        let mailbox = self.mailbox()?;
        let frame = mailbox.next().await.ok_or(TransportError::NotConnected)?;
        *self.last_sender.lock() = frame.sender;
        Ok(codec::decode(&frame.bytes)?)
    }

    fn poll(&self) -> bool {
        self.mailbox().map(|m| m.has_frames()).unwrap_or(false)
    }

    fn private_group(&self) -> String {
        self.private_group_checked().unwrap_or_default()
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

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            self.bus.detach(&session.private_group);
        }
    }
}
