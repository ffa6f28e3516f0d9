//! Listening loops
//!
//! A listener keeps pulling from the transport so control traffic (health
//! checks in particular) is answered even while the owner is busy elsewhere.
//! Delivered envelopes pile up in the queue and are picked up with
//! `receive(false)`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::connection::SystemConnection;
use crate::error::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    /// Run the loop on the calling task.
    Inline,
    /// Spawn a tokio task and return at once.
    Background,
}

impl SystemConnection {
    /// Read until stopped, summing the status code of every read.
    ///
    /// Returns 0 immediately in background mode, when a listener is already
    /// running, or when there is no session to listen to.
    pub async fn listen(self: &Arc<Self>, mode: ListenMode) -> i64 {
        if !self.is_connected() {
            debug!("Not connected, nothing to listen to");
            return 0;
        }
        if self
            .listening
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Already listening");
            return 0;
        }
        self.stop_requested.store(false, Ordering::Release);

        match mode {
            ListenMode::Inline => self.listen_loop().await,
            ListenMode::Background => {
                let connection = Arc::clone(self);
                let handle = tokio::spawn(async move { connection.listen_loop().await });
                *self.listener.lock() = Some(handle);
                0
            }
        }
    }

    async fn listen_loop(&self) -> i64 {
        debug!(connection_id = self.id, "Entering listening state");
        let mut tally: i64 = 0;

        while !self.stop_requested.load(Ordering::Acquire) {
            match self.read_network_message(true).await {
                Ok(()) => {}
                Err(e) => {
                    tally += i64::from(e.status().code());
                    match &e {
                        ConnectionError::TerminateRequested { requested_by } => {
                            info!(requested_by = %requested_by, "Listener stopped by disconnect command");
                            break;
                        }
                        _ if !self.is_connected() => {
                            warn!(error = %e, "Listener stopped, connection is down");
                            break;
                        }
                        _ => debug!(error = %e, "Read failed while listening"),
                    }
                }
            }
        }

        self.listening.store(false, Ordering::Release);
        debug!(connection_id = self.id, tally, "Leaving listening state");
        tally
    }

    /// Ask the listener to stop after its current read.
    pub fn stop_listening(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Wait for a background listener to finish and return its tally.
    /// `None` when no background listener was started.
    pub async fn join_listener(&self) -> Option<i64> {
        let handle = self.listener.lock().take()?;
        match handle.await {
            Ok(tally) => Some(tally),
            Err(e) => {
                warn!(error = %e, "Listener task failed");
                None
            }
        }
    }
}
