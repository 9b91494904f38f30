//! In-process event bus
//!
//! Fans [`BusEvent`]s out to any number of independent, slow consumers
//! (web sockets) under bounded memory:
//!
//! ```text
//!   broker ─┐                         ┌─► SubscriberQueue ─► /ws/events
//!  monitors ─┼─► BusHandle ─► inbox ─► EventBus ─► SubscriberQueue ─► /ws/events
//! publisher ─┘   (try_send)  (mpsc)   dispatcher └─► SubscriberQueue ─► ...
//! ```
//!
//! Each subscriber queue holds at most `client_queue_size` events. When it
//! is full the oldest event is dropped; a queue that cannot take even one
//! event gets its subscriber removed.

pub mod event;
pub mod handle;
pub mod queue;
pub mod store;

pub use event::{BusEvent, EventBody, EventSource, MonitorNotice, Traffic};
pub use handle::BusHandle;
pub use queue::{PushOutcome, SubscriberQueue};
pub use store::{EventBus, PublishReport, SubscriberId, Subscription};
