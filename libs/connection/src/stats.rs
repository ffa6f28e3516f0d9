//! Message statistics
//!
//! Observational counters only. Nothing in the protocol logic reads them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStat {
    pub sent_messages: u64,
    /// Payload bytes of all sent envelopes.
    pub sent_bytes: u64,
    pub received_messages: u64,
    /// Sum of the queue depth observed right after each enqueue.
    pub summed_queue_depth: u64,
}

#[derive(Debug, Default)]
pub struct MessageStats {
    sent_messages: AtomicU64,
    sent_bytes: AtomicU64,
    received_messages: AtomicU64,
    summed_queue_depth: AtomicU64,
}

impl MessageStats {
    pub fn record_sent(&self, payload_len: usize) {
        self.sent_messages.fetch_add(1, Ordering::Relaxed);
        self.sent_bytes.fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self, queue_depth: usize) {
        self.received_messages.fetch_add(1, Ordering::Relaxed);
        self.summed_queue_depth
            .fetch_add(queue_depth as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MessageStat {
        MessageStat {
            sent_messages: self.sent_messages.load(Ordering::Relaxed),
            sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
            received_messages: self.received_messages.load(Ordering::Relaxed),
            summed_queue_depth: self.summed_queue_depth.load(Ordering::Relaxed),
        }
    }
}
