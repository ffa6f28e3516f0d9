//! Group-communication transport contract
//!
//! A transport gives one client a session with a group-communication daemon:
//! a private group for point-to-point replies, group membership, multicast
//! send and blocking receive. Transports are shared between the read and the
//! write side of a connection, so every method takes `&self`.

use async_trait::async_trait;
use types::Envelope;

use crate::Result;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session at `address` under `client_name`.
    async fn connect(&self, address: &str, client_name: &str) -> Result<()>;

    /// Close the session. Pending frames are dropped.
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    async fn subscribe(&self, group: &str) -> Result<()>;

    async fn unsubscribe(&self, group: &str) -> Result<()>;

    /// Multicast `envelope` to `group` (a group name or a private group).
    async fn send(&self, group: &str, msg_type: i32, envelope: &Envelope) -> Result<()>;

    /// Wait for the next frame.
    async fn receive(&self) -> Result<Envelope>;

    /// True when `receive` would return without waiting.
    fn poll(&self) -> bool;

    /// This session's private group, empty when not connected.
    fn private_group(&self) -> String;

    /// Sender of the most recently received frame.
    fn group_of_last_sender(&self) -> String;

    fn sequence_number(&self) -> i64;

    fn set_sequence_number(&self, sequence_number: i64);
}
