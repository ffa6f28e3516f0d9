//! Read-path decision table
//!
//! Every envelope pulled from the transport is classified before anything
//! happens to it. Classification is a pure function of the envelope and two
//! pieces of connection state, so the whole table is testable without a
//! transport:
//!
//! ```text
//! type > 0   own echo                    → Discard
//!            archive kind, subscribed    → Enqueue
//!            archive kind, unsubscribed  → Discard
//!            otherwise                   → Enqueue
//! type < 0   MasterDisconnected          → ShutdownAndError
//!            ClientDisconnected, JoinGroup, LeaveGroup,
//!            StateOfHealthResponse, ListConnectedClientsResponse,
//!            RejectedCommand             → Enqueue
//!            StateOfHealthCommand        → Reply
//!            ClientDisconnectCommand     → Terminate
//!            InvalidArchiveRequest, rest → Discard
//! type == 0                              → Discard
//! ```
//!
//! Classification never changes connection state itself; the caller carries
//! out whatever side effect the [`Action`] names.

use std::collections::BTreeSet;
use std::fmt;

use types::{Envelope, ServiceMessage, ServiceMessageType};

/// The slice of connection state the decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierState<'a> {
    /// This client's private group, for the no-echo rule.
    pub private_group: &'a str,
    pub archive_groups: &'a BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Hand to the caller through the message queue.
    Enqueue(Envelope),
    /// Health-check request to answer in place; never surfaced to the caller.
    Reply(ServiceMessage),
    Discard(DiscardReason),
    /// Disconnect command from an administrator.
    Terminate { requested_by: String },
    /// The master went away.
    ShutdownAndError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// Data message this client sent itself.
    OwnMessage,
    UnsubscribedArchive { group: String },
    InvalidArchiveRequest,
    /// Wire type 0.
    UndefinedType,
    /// Control subtype this layer does not handle.
    UnhandledService(i32),
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::OwnMessage => f.write_str("own message"),
            DiscardReason::UnsubscribedArchive { group } => {
                write!(f, "archive message for unsubscribed group {group}")
            }
            DiscardReason::InvalidArchiveRequest => f.write_str("invalid archive request"),
            DiscardReason::UndefinedType => f.write_str("undefined message type"),
            DiscardReason::UnhandledService(t) => write!(f, "unhandled service message {t}"),
        }
    }
}

pub fn classify(state: &ClassifierState<'_>, envelope: Envelope) -> Action {
    match envelope {
        Envelope::Data(msg) => {
            if msg.private_sender_group() == state.private_group {
                Action::Discard(DiscardReason::OwnMessage)
            } else if msg.is_archive() && !state.archive_groups.contains(msg.destination()) {
                Action::Discard(DiscardReason::UnsubscribedArchive {
                    group: msg.destination().to_string(),
                })
            } else {
                Action::Enqueue(Envelope::Data(msg))
            }
        }
        Envelope::Service(msg) => classify_service(msg),
        Envelope::Undefined(_) => Action::Discard(DiscardReason::UndefinedType),
    }
}

fn classify_service(msg: ServiceMessage) -> Action {
    use ServiceMessageType::*;

    match msg.service_type() {
        Some(MasterDisconnected) => Action::ShutdownAndError,
        Some(
            ClientDisconnected
            | JoinGroup
            | LeaveGroup
            | StateOfHealthResponse
            | ListConnectedClientsResponse
            | RejectedCommand,
        ) => Action::Enqueue(Envelope::Service(msg)),
        Some(InvalidArchiveRequest) => Action::Discard(DiscardReason::InvalidArchiveRequest),
        Some(ClientDisconnectCommand) => Action::Terminate {
            requested_by: msg.header().private_sender_group().to_string(),
        },
        Some(StateOfHealthCommand) => Action::Reply(msg),
        _ => Action::Discard(DiscardReason::UnhandledService(msg.header().msg_type())),
    }
}
