//! Event bus implementation
//!
//! [`EventBus`] owns every subscriber queue. All mutation goes through
//! `&mut self`, so whoever owns the bus is its single writer. Other tasks
//! and threads reach it through a [`BusHandle`](super::BusHandle).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::stats::{BusStats, BusStatsSnapshot};

use super::event::BusEvent;
use super::handle::BusCommand;
use super::queue::{PushOutcome, SubscriberQueue};

/// Opaque subscriber identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Consumer side of one subscriber queue
///
/// Dropping it closes the queue; the bus forgets the subscriber no later
/// than its next publish.
pub struct Subscription {
    id: SubscriberId,
    queue: Arc<SubscriberQueue>,
    unsubscribe: Option<mpsc::WeakSender<BusCommand>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event; `None` once the bus dropped this subscriber or shut down
    pub async fn recv(&self) -> Option<Arc<BusEvent>> {
        self.queue.recv().await
    }

    pub fn try_recv(&self) -> Option<Arc<BusEvent>> {
        self.queue.try_recv()
    }

    /// Events currently queued
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether the bus stopped delivering to this subscriber
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(tx) = self.unsubscribe.as_ref().and_then(|weak| weak.upgrade()) {
            let _ = tx.try_send(BusCommand::Unsubscribe(self.id));
        }
    }
}

/// What a single publish did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the event was queued for
    pub delivered: usize,
    /// Events lost to drop-oldest or refused outright
    pub dropped: usize,
    /// Subscribers removed during this publish
    pub removed: usize,
}

/// Fan-out of events to independent bounded subscriber queues
pub struct EventBus {
    subscribers: HashMap<SubscriberId, Arc<SubscriberQueue>>,
    next_id: u64,
    client_queue_size: usize,
    stats: Arc<BusStats>,
}

impl EventBus {
    /// Create a bus whose subscribers each hold up to `client_queue_size` events
    pub fn new(client_queue_size: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            next_id: 1,
            client_queue_size,
            stats: Arc::new(BusStats::new()),
        }
    }

    pub fn client_queue_size(&self) -> usize {
        self.client_queue_size
    }

    pub(crate) fn stats_handle(&self) -> Arc<BusStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Register a new subscriber
    pub fn subscribe(&mut self) -> Subscription {
        self.register(None)
    }

    pub(crate) fn register(&mut self, unsubscribe: Option<mpsc::WeakSender<BusCommand>>) -> Subscription {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;

        let queue = Arc::new(SubscriberQueue::new(self.client_queue_size));
        self.subscribers.insert(id, Arc::clone(&queue));
        self.stats.set_subscribers(self.subscribers.len());

        tracing::debug!(subscriber = %id, subscribers = self.subscribers.len(), "Subscriber registered");

        Subscription {
            id,
            queue,
            unsubscribe,
        }
    }

    /// Forget a subscriber; unknown ids are ignored
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some(queue) => {
                queue.close();
                self.stats.set_subscribers(self.subscribers.len());
                tracing::debug!(subscriber = %id, subscribers = self.subscribers.len(), "Subscriber removed");
                true
            }
            None => false,
        }
    }

    /// Offer `event` to every subscriber without waiting
    ///
    /// A full queue loses its oldest event. A queue that is still full after
    /// that belongs to an unresponsive subscriber, which is removed.
    pub fn publish(&mut self, event: BusEvent) -> PublishReport {
        let event = Arc::new(event);
        let mut report = PublishReport::default();
        let mut remove = Vec::new();

        for (id, queue) in &self.subscribers {
            match queue.push(Arc::clone(&event)) {
                PushOutcome::Delivered => report.delivered += 1,
                PushOutcome::DroppedOldest => {
                    report.delivered += 1;
                    report.dropped += 1;
                }
                PushOutcome::Full => {
                    report.dropped += 1;
                    remove.push(*id);
                }
                PushOutcome::Closed => remove.push(*id),
            }
        }

        self.stats.record_published();
        self.stats.record_dropped(report.dropped as u64);

        for id in remove {
            if let Some(queue) = self.subscribers.remove(&id) {
                if !queue.is_closed() {
                    tracing::warn!(subscriber = %id, "Evicting unresponsive subscriber");
                    queue.close();
                }
                report.removed += 1;
            }
        }
        if report.removed > 0 {
            self.stats.set_subscribers(self.subscribers.len());
        }

        report
    }

    /// Close every subscriber queue and forget them
    pub fn close_all(&mut self) {
        for (_, queue) in self.subscribers.drain() {
            queue.close();
        }
        self.stats.set_subscribers(0);
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.close_all();
    }
}
