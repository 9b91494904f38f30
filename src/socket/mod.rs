//! Pub/sub sockets over TCP
//!
//! A small socket layer on top of [`crate::protocol`], shaped after the
//! ZeroMQ model:
//!
//! ```text
//!                      Context (CancellationToken + TaskTracker)
//!                     ┌─────────────────────────────────────────┐
//!   producers ──TCP──►│ BoundSocket XSUB ─┐        ┌─ BoundSocket XPUB │◄──TCP── consumers
//!                     │   accept loop     │        │   accept loop     │
//!                     │   peer tasks ─────┼─► recv │   peer tasks      │
//!                     │                   └─ send ◄┘                   │
//!                     │ ConnectedSocket PUB / SUB (one peer task)      │
//!                     └─────────────────────────────────────────┘
//! ```
//!
//! Every task runs under its context; terminating the context makes every
//! socket operation return [`Error::Terminated`](crate::error::Error::Terminated).

pub mod connection;
pub mod connector;
pub mod context;
pub mod endpoint;
pub mod listener;
pub mod monitor;

use std::time::Duration;

pub use connector::ConnectedSocket;
pub use context::Context;
pub use endpoint::Endpoint;
pub use listener::BoundSocket;
pub use monitor::{event_name, MonitorRecord, SocketEvent};

pub use crate::protocol::SocketType;

use crate::protocol::constants::DEFAULT_MAX_FRAME_SIZE;

/// Per-socket tuning knobs
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Messages queued per peer before new ones are dropped (XPUB) or the sender waits (PUB)
    pub send_hwm: usize,

    /// Messages queued from peers before reading from the network pauses
    pub recv_hwm: usize,

    /// How long queued output may keep flushing after close
    pub linger: Duration,

    /// Deadline for the greeting + READY exchange
    pub handshake_timeout: Duration,

    /// Largest accepted frame body
    pub max_frame_size: usize,

    /// Lifecycle records buffered for the monitor before they are dropped
    pub monitor_capacity: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            send_hwm: 1000,
            recv_hwm: 1000,
            linger: Duration::ZERO,
            handshake_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            monitor_capacity: 256,
        }
    }
}

impl SocketOptions {
    /// Set the send high-water mark
    pub fn send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm.max(1);
        self
    }

    /// Set the receive high-water mark
    pub fn recv_hwm(mut self, hwm: usize) -> Self {
        self.recv_hwm = hwm.max(1);
        self
    }

    /// Set linger on close
    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Set the handshake deadline
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the monitor buffer size
    pub fn monitor_capacity(mut self, capacity: usize) -> Self {
        self.monitor_capacity = capacity.max(1);
        self
    }
}
