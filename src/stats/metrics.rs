//! Counters for the event bus and the forwarding broker
//!
//! Counters are atomics so readers (the health endpoint) never contend
//! with the component that owns them. Only the owning component writes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Event bus counters
#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    dropped: AtomicU64,
    overflow: AtomicU64,
    subscribers: AtomicUsize,
}

impl BusStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// One publish call, regardless of how many subscribers it reached
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Events lost by one subscriber queue
    pub(crate) fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.dropped.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Event refused before reaching the bus because its inbox was full
    pub(crate) fn record_overflow(&self) {
        self.overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_subscribers(&self, count: usize) {
        self.subscribers.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStatsSnapshot {
        BusStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            subscribers: self.subscribers.load(Ordering::Relaxed),
            overflow: self.overflow.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BusStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStatsSnapshot {
    /// Publish calls handled
    pub published: u64,
    /// Events evicted from or refused by subscriber queues
    pub dropped: u64,
    /// Live subscriber gauge
    pub subscribers: usize,
    /// Events refused at the bus inbox
    pub overflow: u64,
}

/// Forwarding broker counters
#[derive(Debug, Default)]
pub struct BrokerStats {
    messages_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    subscriptions_forwarded: AtomicU64,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A data message went ingress → egress
    pub(crate) fn record_message(&self, bytes: usize) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
        self.bytes_forwarded
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A subscription frame went egress → ingress
    pub(crate) fn record_subscription(&self) {
        self.subscriptions_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BrokerStatsSnapshot {
        BrokerStatsSnapshot {
            messages_forwarded: self.messages_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            subscriptions_forwarded: self.subscriptions_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BrokerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStatsSnapshot {
    pub messages_forwarded: u64,
    pub bytes_forwarded: u64,
    pub subscriptions_forwarded: u64,
}
