//! The protocol client
//!
//! `SystemConnection` owns one session with the master: it runs the
//! handshake, keeps the advertised group list and the subscription sets,
//! classifies everything the transport delivers, queues what the caller
//! should see, and routes every outgoing envelope through the master's
//! private group.
//!
//! ## Locking
//!
//! ```text
//! read_region   tokio::Mutex   serializes transport.receive()
//! write_region  tokio::Mutex   serializes transport.send()
//! queue         parking_lot    delivered envelopes, never held across .await
//! state         parking_lot    groups, subscriptions, flags, never held across .await
//! ```
//!
//! The read region is held from `transport.receive()` until the envelope has
//! been queued or acted on, so the queue keeps arrival order. Acting on an
//! envelope may take the write region, always after the read region.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use network::{Transport, TransportError};
use types::{
    ClientPriority, ClientType, Envelope, ProtocolVersion, SchemaVersion, ServiceMessage,
    ServiceMessageType, ADMIN_GROUP, LISTENER_GROUP, MASTER_GROUP, STATUS_GROUP,
};

use crate::bookmark::BookmarkStore;
use crate::classify::{classify, Action, ClassifierState};
use crate::error::{ConnectionError, Result};
use crate::registry::{ConnectionStatus, Registry};
use crate::state::{ConnectParams, ConnectionState};
use crate::stats::{MessageStat, MessageStats};

pub struct SystemConnection {
    pub(crate) id: u64,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: Arc<dyn Registry>,
    bookmarks: BookmarkStore,
    pub(crate) state: Mutex<ConnectionState>,
    queue: Mutex<VecDeque<Envelope>>,
    pub(crate) read_region: tokio::sync::Mutex<()>,
    write_region: tokio::sync::Mutex<()>,
    stats: MessageStats,
    /// Encoded copy of the last envelope handed to the caller.
    last_delivered: Mutex<Option<Vec<u8>>>,
    pub(crate) stop_requested: AtomicBool,
    pub(crate) listening: AtomicBool,
    pub(crate) listener: Mutex<Option<JoinHandle<i64>>>,
}

impl SystemConnection {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<dyn Registry>,
        bookmarks: BookmarkStore,
    ) -> Self {
        Self {
            id: crate::generate_connection_id(),
            transport,
            registry,
            bookmarks,
            state: Mutex::new(ConnectionState::default()),
            queue: Mutex::new(VecDeque::new()),
            read_region: tokio::sync::Mutex::new(()),
            write_region: tokio::sync::Mutex::new(()),
            stats: MessageStats::default(),
            last_delivered: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    /// Cap the schema version negotiated with the master.
    pub fn with_max_schema_version(self, max: SchemaVersion) -> Self {
        self.state.lock().max_schema_version = max;
        self
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Open a fresh session. Nothing from an earlier session survives: the
    /// queue, the advertised groups and the archive guard start over.
    pub async fn connect(self: &Arc<Self>, params: ConnectParams) -> Result<()> {
        if params.peer_group == MASTER_GROUP {
            error!(group = %params.peer_group, "Cannot be a regular member of the control group");
            return Err(ConnectionError::invalid_group(params.peer_group));
        }
        if self.is_connected() {
            return Ok(());
        }

        let (address, client_name) = {
            let mut state = self.state.lock();
            let client_name = if params.client_name.is_empty() {
                state.params.client_name.clone()
            } else {
                params.client_name.clone()
            };
            state.params = ConnectParams {
                client_name,
                ..params
            };
            state.schema_version = SchemaVersion::default();
            state.archive_requested = false;
            state.groups.clear();
            state.private_master_group.clear();
            (
                state.params.master_address.clone(),
                state.params.client_name.clone(),
            )
        };
        self.queue.lock().clear();

        info!(address = %address, client = %client_name, "Connecting to server");
        if let Err(e) = self.transport.connect(&address, &client_name).await {
            error!(address = %address, error = %e, "Could not connect to server");
            return Err(e.into());
        }
        info!(address = %address, "Connected to message server");

        self.state.lock().archive_groups.clear();

        info!(group = MASTER_GROUP, "Joining control group");
        if let Err(e) = self.transport.subscribe(MASTER_GROUP).await {
            error!(group = MASTER_GROUP, error = %e, "Could not join control group");
            let _ = self.shutdown().await;
            return Err(e.into());
        }

        let mut result = self.handshake(ProtocolVersion::V1_1).await;
        if let Err(ConnectionError::WrongServerVersion { supported }) = &result {
            match supported.as_deref().and_then(ProtocolVersion::parse) {
                Some(ProtocolVersion::V1_0) => {
                    info!(version = ProtocolVersion::V1_0.as_str(), "Falling back to master protocol");
                    result = self.handshake(ProtocolVersion::V1_0).await;
                }
                _ => error!(
                    version = supported.as_deref().unwrap_or("unknown"),
                    "Unsupported master protocol"
                ),
            }
        }
        if let Err(e) = result {
            let _ = self.shutdown().await;
            return Err(e);
        }

        self.state.lock().connected = true;
        self.registry.register_connection(self);
        Ok(())
    }

    /// Tell the master we are leaving, drop everything pending, then shut down.
    pub async fn disconnect(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }

        let (master_group, client_type, priority) = {
            let state = self.state.lock();
            (
                state.private_master_group.clone(),
                state.params.client_type,
                state.params.priority,
            )
        };
        let private_group = self.transport.private_group();
        let mut notice = ServiceMessage::new(ServiceMessageType::ClientDisconnected)
            .with_client(client_type, priority)
            .with_payload(private_group.as_bytes());
        notice.header_mut().set_private_sender_group(private_group);
        if let Err(e) = self.transmit(&master_group, notice.into()).await {
            error!(error = %e, "Could not send disconnect message to server");
        }

        self.state.lock().groups.clear();
        self.queue.lock().clear();

        self.shutdown().await
    }

    /// Drop the transport session. Safe to call repeatedly.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.archive_requested = false;
            state.connected = false;
        }
        if self.transport.is_connected() {
            if let Err(e) = self.transport.disconnect().await {
                error!(error = %e, "Could not properly disconnect");
                return Err(ConnectionError::networking(e.to_string()));
            }
        }
        Ok(())
    }

    /// Disconnect if needed, connect with the last parameters and rejoin every
    /// subscribed group. Archive subscriptions are not restored.
    ///
    /// Every group is retried even if one fails; the first failure is
    /// returned and the new session stays up.
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        if self.is_connected() {
            let _ = self.disconnect().await;
        }

        let params = self.state.lock().params.clone();
        self.connect(params).await?;

        let subscriptions: Vec<String> = self.state.lock().subscriptions.iter().cloned().collect();
        let mut first_failure = None;
        for group in subscriptions {
            if let Err(e) = self.join(&group, false).await {
                warn!(group = %group, error = %e, "Could not resubscribe after reconnect");
                first_failure.get_or_insert(e);
            }
        }
        if let Some(e) = first_failure {
            return Err(e);
        }
        info!("Client is reconnected to master client");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected() && self.state.lock().connected
    }

    // ---------------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------------

    pub async fn subscribe(&self, group: &str) -> Result<()> {
        self.join(group, true).await
    }

    /// Join `group`. A caller-initiated join rules out a later archive replay
    /// on this connection; rejoining after a reconnect does not.
    async fn join(&self, group: &str, blocks_archive_request: bool) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !(state.connected && self.transport.is_connected()) {
                return Err(ConnectionError::NotConnected);
            }
            if blocks_archive_request {
                state.archive_requested = true;
            }
            Self::check_subscribable(&state, group)?;
        }

        info!(group = %group, "Joining group");
        if let Err(e) = self.transport.subscribe(group).await {
            error!(group = %group, error = %e, "Could not subscribe to group");
            return Err(e.into());
        }
        self.state.lock().subscriptions.insert(group.to_string());
        Ok(())
    }

    pub async fn unsubscribe(&self, group: &str) -> Result<()> {
        self.check_connected_and_subscribable(group)?;

        info!(group = %group, "Leaving group");
        if let Err(e) = self.transport.unsubscribe(group).await {
            error!(group = %group, error = %e, "Could not unsubscribe group");
            return Err(e.into());
        }
        self.state.lock().subscriptions.remove(group);
        Ok(())
    }

    /// Accept archive replays for `group`. Does not join the group.
    pub fn subscribe_archive(&self, group: &str) -> Result<()> {
        self.check_connected_and_subscribable(group)?;
        self.state.lock().archive_groups.insert(group.to_string());
        Ok(())
    }

    pub fn unsubscribe_archive(&self, group: &str) -> Result<()> {
        self.check_connected_and_subscribable(group)?;
        self.state.lock().archive_groups.remove(group);
        Ok(())
    }

    fn check_connected_and_subscribable(&self, group: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        Self::check_subscribable(&self.state.lock(), group)
    }

    fn check_subscribable(state: &ConnectionState, group: &str) -> Result<()> {
        if group == MASTER_GROUP {
            info!(group = %group, "Group is solely for private communication");
            return Err(ConnectionError::invalid_group(group));
        }
        if !state.is_group_available(group) {
            error!(group = %group, "Group does not exist");
            return Err(ConnectionError::invalid_group(group));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Read path
    // ---------------------------------------------------------------------

    /// Pull envelopes from the transport until one is queued for the caller.
    ///
    /// Non-blocking mode returns [`ConnectionError::NoData`] as soon as
    /// another reader holds the transport or nothing is pending.
    pub async fn read_network_message(&self, blocking: bool) -> Result<()> {
        loop {
            let _guard = if blocking {
                self.read_region.lock().await
            } else {
                match self.read_region.try_lock() {
                    Ok(guard) if self.transport.poll() => guard,
                    _ => return Err(ConnectionError::NoData),
                }
            };

            let envelope = match self.transport.receive().await {
                Ok(envelope) => envelope,
                Err(TransportError::NotConnected) => {
                    debug!("Connection has been closed while reading from network");
                    return Err(ConnectionError::NotConnected);
                }
                Err(e) if e.is_transient() => {
                    debug!(error = %e, "Skipping unreadable frame");
                    continue;
                }
                Err(e) => {
                    if self.transport.is_connected() {
                        error!(error = %e, "Error during reading attempt");
                        let _ = self.shutdown().await;
                    }
                    return Err(e.into());
                }
            };

            let action = {
                let state = self.state.lock();
                let private_group = self.transport.private_group();
                let view = ClassifierState {
                    private_group: &private_group,
                    archive_groups: &state.archive_groups,
                };
                classify(&view, envelope)
            };

            match action {
                Action::Enqueue(envelope) => {
                    self.enqueue(envelope);
                    return Ok(());
                }
                Action::Discard(reason) => {
                    debug!(reason = %reason, "Discarding message");
                }
                Action::Reply(request) => self.answer_health_check(request).await,
                Action::ShutdownAndError => {
                    info!("Master disconnected, shutting down connection");
                    let _ = self.shutdown().await;
                    return Err(ConnectionError::NotConnected);
                }
                Action::Terminate { requested_by } => {
                    info!(requested_by = %requested_by, "Received disconnect command");
                    if let Err(e) = self.disconnect().await {
                        warn!(error = %e, "Disconnect after disconnect command failed");
                    }
                    return Err(ConnectionError::TerminateRequested { requested_by });
                }
            }
        }
    }

    /// Next envelope for the caller, reading from the transport if the queue
    /// is empty. Every delivered envelope becomes the new bookmark.
    pub async fn receive(&self, blocking: bool) -> Result<Envelope> {
        if self.queued_message_count() == 0 {
            self.read_network_message(blocking).await?;
        }
        let envelope = self
            .queue
            .lock()
            .pop_front()
            .ok_or(ConnectionError::NoData)?;
        self.remember_delivered(&envelope);
        Ok(envelope)
    }

    fn enqueue(&self, envelope: Envelope) {
        let mut queue = self.queue.lock();
        queue.push_back(envelope);
        self.stats.record_enqueued(queue.len());
    }

    fn remember_delivered(&self, envelope: &Envelope) {
        let bytes = match codec::encode(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Could not encode bookmark");
                return;
            }
        };
        let client_name = self.state.lock().params.client_name.clone();
        if let Err(e) = self.bookmarks.save_encoded(&client_name, &bytes) {
            warn!(error = %e, "Could not persist bookmark");
        }
        *self.last_delivered.lock() = Some(bytes);
    }

    async fn answer_health_check(&self, request: ServiceMessage) {
        let requester = request.header().private_sender_group().to_string();
        let master_group = self.state.lock().private_master_group.clone();
        let mut response = ServiceMessage::new(ServiceMessageType::StateOfHealthResponse)
            .with_payload(self.registry.info(&self.status_snapshot()));
        response.header_mut().set_destination(requester.as_str());
        response
            .header_mut()
            .set_private_sender_group(self.transport.private_group());

        debug!(requester = %requester, "Sending state of health response");
        if let Err(e) = self.transmit(&master_group, response.into()).await {
            warn!(requester = %requester, error = %e, "Could not answer health check");
        }
    }

    // ---------------------------------------------------------------------
    // Write path
    // ---------------------------------------------------------------------

    /// Publish `envelope` to `group` through the master.
    pub async fn send(&self, group: &str, mut envelope: Envelope) -> Result<()> {
        let master_group = {
            let state = self.state.lock();
            if !(state.connected && self.transport.is_connected()) {
                return Err(ConnectionError::NotConnected);
            }
            if group == MASTER_GROUP {
                error!(group = %group, "Cannot be a regular member of the control group");
                return Err(ConnectionError::invalid_group(group));
            }
            if group == LISTENER_GROUP {
                error!(group = %group, "Cannot send to listener group");
                return Err(ConnectionError::invalid_group(group));
            }
            let routable =
                state.is_group_available(group) || group == state.private_master_group;
            if !routable || (group == ADMIN_GROUP && state.params.peer_group != ADMIN_GROUP) {
                error!(group = %group, "Group does not exist or is not writable");
                return Err(ConnectionError::invalid_group(group));
            }
            state.private_master_group.clone()
        };

        // React to anything already waiting (a disconnect notice in particular)
        // before the send goes out.
        loop {
            match self.read_network_message(false).await {
                Ok(()) => continue,
                Err(e @ ConnectionError::TerminateRequested { .. }) => return Err(e),
                Err(_) => break,
            }
        }
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }

        envelope.set_private_sender_group(self.transport.private_group());
        envelope.set_destination(group);
        self.transmit(&master_group, envelope).await
    }

    /// Publish this client's status blob to the status group.
    pub async fn send_status_report(&self) -> Result<()> {
        let report = ServiceMessage::new(ServiceMessageType::StateOfHealthResponse)
            .with_client(ClientType::Default, ClientPriority::High)
            .with_payload(self.registry.info(&self.status_snapshot()));
        self.send(STATUS_GROUP, report.into()).await
    }

    /// `send` to this client's own peer group.
    pub async fn send_to_peer_group(&self, envelope: Envelope) -> Result<()> {
        let peer_group = self.peer_group();
        self.send(&peer_group, envelope).await
    }

    /// Hand an envelope to the transport under the write region.
    pub(crate) async fn transmit(&self, group: &str, envelope: Envelope) -> Result<()> {
        let _guard = self.write_region.lock().await;
        if let Err(e) = self
            .transport
            .send(group, envelope.msg_type(), &envelope)
            .await
        {
            error!(group = %group, error = %e, "Could not send message to server");
            return Err(e.into());
        }
        self.stats.record_sent(envelope.payload().len());
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Archive replay
    // ---------------------------------------------------------------------

    /// Ask the master to replay everything published since the bookmark.
    /// Allowed once per connection, before any regular subscription.
    pub async fn archive_request(&self) -> Result<()> {
        let (client_name, master_group) = {
            let mut state = self.state.lock();
            if state.archive_requested {
                info!("Archived messages have been requested before or this call was not placed directly after connect");
                return Err(ConnectionError::ArchiveRequest(
                    "archive already requested on this connection; reconnect to request again"
                        .to_string(),
                ));
            }
            state.archive_requested = true;
            (
                state.params.client_name.clone(),
                state.private_master_group.clone(),
            )
        };

        let bookmark = self.bookmarks.load(&client_name).map_err(|e| {
            error!(error = %e, "Could not read bookmark");
            ConnectionError::ArchiveRequest(e.to_string())
        })?;

        let mut request = ServiceMessage::new(ServiceMessageType::ArchiveRequest);
        request.set_archive_position(
            bookmark.header().sequence_number(),
            bookmark.header().timestamp(),
        );
        request
            .header_mut()
            .set_private_sender_group(self.transport.private_group());
        debug!(
            sequence_number = request.archive_sequence_number(),
            timestamp = request.archive_timestamp(),
            "Requesting archive replay"
        );

        if self.poll() || self.queued_message_count() > 0 {
            warn!("There are messages in the queue while requesting an archive replay");
        }

        self.transmit(&master_group, request.into()).await
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Groups advertised by the master, in its order.
    pub fn groups(&self) -> Vec<String> {
        self.state.lock().groups.clone()
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    pub fn group(&self, index: usize) -> Option<String> {
        self.state.lock().groups.get(index).cloned()
    }

    pub fn is_group_available(&self, group: &str) -> bool {
        self.state.lock().is_group_available(group)
    }

    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.state.lock().subscriptions.clone()
    }

    pub fn archive_subscriptions(&self) -> BTreeSet<String> {
        self.state.lock().archive_groups.clone()
    }

    /// Schema version agreed with the master, after clamping.
    pub fn schema_version(&self) -> SchemaVersion {
        self.state.lock().schema_version
    }

    pub fn peer_group(&self) -> String {
        self.state.lock().params.peer_group.clone()
    }

    pub fn master_address(&self) -> String {
        self.state.lock().params.master_address.clone()
    }

    pub fn client_name(&self) -> String {
        self.state.lock().params.client_name.clone()
    }

    pub fn private_group(&self) -> String {
        self.transport.private_group()
    }

    /// The master's private reply group, learned during the handshake.
    pub fn private_master_group(&self) -> String {
        self.state.lock().private_master_group.clone()
    }

    pub fn client_type(&self) -> ClientType {
        self.state.lock().params.client_type
    }

    pub fn priority(&self) -> ClientPriority {
        self.state.lock().params.priority
    }

    pub fn password(&self) -> String {
        self.state.lock().password.clone()
    }

    pub fn set_password(&self, password: impl Into<String>) {
        self.state.lock().password = password.into();
    }

    pub fn queued_message_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// True when the transport has frames waiting.
    pub fn poll(&self) -> bool {
        self.transport.poll()
    }

    pub fn message_stats(&self) -> MessageStat {
        self.stats.snapshot()
    }

    pub fn status_snapshot(&self) -> ConnectionStatus {
        ConnectionStatus {
            id: self.id,
            client_name: self.client_name(),
            private_group: self.transport.private_group(),
            stats: self.stats.snapshot(),
            queue_size: self.queued_message_count(),
        }
    }

    pub fn sequence_number(&self) -> i64 {
        self.transport.sequence_number()
    }

    pub fn set_sequence_number(&self, sequence_number: i64) {
        self.transport.set_sequence_number(sequence_number);
    }

    pub fn bookmarks(&self) -> &BookmarkStore {
        &self.bookmarks
    }
}

impl Drop for SystemConnection {
    fn drop(&mut self) {
        self.registry.unregister_connection(self.id);

        if let Some(bytes) = self.last_delivered.get_mut().take() {
            let client_name = self.state.get_mut().params.client_name.clone();
            if let Err(e) = self.bookmarks.save_encoded(&client_name, &bytes) {
                warn!(error = %e, "Could not flush bookmark");
            }
        }
    }
}
