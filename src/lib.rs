//! zmqhub: a ZeroMQ pub/sub forwarding hub with a live web view
//!
//! Producers connect to the ingress endpoint, consumers to the egress
//! endpoint. Everything forwarded between them is also published on an
//! in-process event bus, together with socket lifecycle notices, and
//! streamed to browsers over WebSocket. Browsers can inject messages back
//! into the ingress endpoint.
//!
//! ```text
//!  producers ─► ingress (XSUB) ─► Broker ─► egress (XPUB) ─► consumers
//!                  ▲                │
//!   InjectionPublisher (PUB)        ▼
//!                  ▲             EventBus ─► /ws/events
//!             /ws/control
//! ```
//!
//! The transport is a pure-Rust ZMTP 3.0 implementation ([`protocol`],
//! [`socket`]) interoperable with libzmq peers over TCP.

pub mod app;
pub mod bus;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod socket;
pub mod stats;
pub mod web;

pub use app::AppContext;
pub use bus::{BusEvent, BusHandle, EventBus, EventSource, Subscription};
pub use client::{InjectionPublisher, PublishRequest};
pub use config::Settings;
pub use error::{Error, Result};
pub use hub::{Health, Hub};
pub use server::Broker;
