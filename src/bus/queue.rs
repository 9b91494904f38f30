//! Bounded per-subscriber queue with drop-oldest overflow
//!
//! The bus is the only producer and the subscriber the only consumer.
//! Overflow handling happens under the queue lock, so "full, evict one,
//! insert" is a single step.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::event::BusEvent;

/// Result of offering an event to a subscriber queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued without loss
    Delivered,
    /// Queue was full; its oldest event was evicted to make room
    DroppedOldest,
    /// Queue cannot hold even one event; the subscriber is unresponsive
    Full,
    /// Subscriber went away
    Closed,
}

#[derive(Debug)]
struct QueueState {
    events: VecDeque<Arc<BusEvent>>,
    closed: bool,
}

#[derive(Debug)]
pub struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, event: Arc<BusEvent>) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            if state.events.len() < self.capacity {
                state.events.push_back(event);
                PushOutcome::Delivered
            } else {
                state.events.pop_front();
                if state.events.len() < self.capacity {
                    state.events.push_back(event);
                    PushOutcome::DroppedOldest
                } else {
                    return PushOutcome::Full;
                }
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Next event, waiting if the queue is empty; `None` once closed and drained
    pub async fn recv(&self) -> Option<Arc<BusEvent>> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(event) = state.events.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<Arc<BusEvent>> {
        self.state.lock().events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further events and wake the consumer
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    use crate::bus::event::{EventBody, EventSource};

    fn event(topic: &'static str) -> Arc<BusEvent> {
        Arc::new(BusEvent::traffic(
            EventSource::Ingress,
            &[Bytes::from_static(topic.as_bytes())],
        ))
    }

    fn topic_of(event: &BusEvent) -> String {
        match &event.body {
            EventBody::Traffic(t) => t.topic.text.clone(),
            EventBody::Monitor(_) => panic!("not traffic"),
        }
    }

    #[test]
    fn test_push_until_full_then_drop_oldest() {
        let queue = SubscriberQueue::new(2);
        assert_eq!(queue.push(event("e1")), PushOutcome::Delivered);
        assert_eq!(queue.push(event("e2")), PushOutcome::Delivered);
        assert_eq!(queue.push(event("e3")), PushOutcome::DroppedOldest);

        assert_eq!(queue.len(), 2);
        assert_eq!(topic_of(&queue.try_recv().unwrap()), "e2");
        assert_eq!(topic_of(&queue.try_recv().unwrap()), "e3");
        assert!(queue.try_recv().is_none());
    }

    #[test]
    fn test_zero_capacity_is_full() {
        let queue = SubscriberQueue::new(0);
        assert_eq!(queue.push(event("e1")), PushOutcome::Full);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_refuses() {
        let queue = SubscriberQueue::new(4);
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.push(event("e1")), PushOutcome::Closed);
    }

    #[tokio::test]
    async fn test_recv_waits_for_push() {
        let queue = Arc::new(SubscriberQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(event("late"));

        let received = consumer.await.unwrap().unwrap();
        assert_eq!(topic_of(&received), "late");
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = SubscriberQueue::new(4);
        queue.push(event("e1"));
        queue.close();

        assert_eq!(topic_of(&queue.recv().await.unwrap()), "e1");
        assert!(queue.recv().await.is_none());
    }
}
