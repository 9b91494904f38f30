//! Cross-task access to the event bus
//!
//! [`EventBus::spawn`] moves the bus into a dispatcher task fed by one
//! bounded inbox. Producers on any task or thread hold a cloneable
//! [`BusHandle`]; the dispatcher applies their commands one at a time.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::stats::{BusStats, BusStatsSnapshot};

use super::event::BusEvent;
use super::store::{EventBus, SubscriberId, Subscription};

pub(crate) enum BusCommand {
    Publish(BusEvent),
    Subscribe(oneshot::Sender<Subscription>),
    Unsubscribe(SubscriberId),
    Shutdown,
}

/// Cloneable producer / subscriber entry point
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusCommand>,
    stats: Arc<BusStats>,
}

impl BusHandle {
    /// Queue an event for fan-out without waiting
    ///
    /// Callable from any thread, including ones outside the runtime.
    /// Returns `false` if the inbox was full or the bus has stopped.
    pub fn publish(&self, event: BusEvent) -> bool {
        match self.tx.try_send(BusCommand::Publish(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_overflow();
                tracing::warn!("Event bus inbox full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Register a new subscriber
    pub async fn subscribe(&self) -> Result<Subscription> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusCommand::Subscribe(reply_tx))
            .await
            .map_err(|_| Error::Terminated)?;
        reply_rx.await.map_err(|_| Error::Terminated)
    }

    /// Forget a subscriber; a no-op if it is already gone
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.tx.send(BusCommand::Unsubscribe(id)).await;
    }

    pub fn stats(&self) -> BusStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stop the dispatcher; pending commands ahead of this one still apply
    pub async fn shutdown(&self) {
        let _ = self.tx.send(BusCommand::Shutdown).await;
    }
}

impl EventBus {
    /// Move the bus into its own dispatcher task
    ///
    /// `inbox_size` bounds commands waiting for the dispatcher.
    pub fn spawn(self, inbox_size: usize) -> (BusHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(inbox_size.max(1));
        let handle = BusHandle {
            tx: tx.clone(),
            stats: self.stats_handle(),
        };
        let task = tokio::spawn(dispatch(self, rx, tx.downgrade()));
        (handle, task)
    }
}

async fn dispatch(
    mut bus: EventBus,
    mut rx: mpsc::Receiver<BusCommand>,
    weak_tx: mpsc::WeakSender<BusCommand>,
) {
    tracing::debug!(client_queue_size = bus.client_queue_size(), "Event bus started");

    while let Some(command) = rx.recv().await {
        match command {
            BusCommand::Publish(event) => {
                bus.publish(event);
            }
            BusCommand::Subscribe(reply) => {
                let subscription = bus.register(Some(weak_tx.clone()));
                // Caller gave up; dropping the subscription unregisters it
                let _ = reply.send(subscription);
            }
            BusCommand::Unsubscribe(id) => {
                bus.unsubscribe(id);
            }
            BusCommand::Shutdown => break,
        }
    }

    bus.close_all();
    tracing::debug!(published = bus.stats().published, "Event bus stopped");
}
