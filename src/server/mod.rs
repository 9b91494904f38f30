//! Broker side of the hub: the XSUB/XPUB forwarder and its lifecycle monitors

pub mod broker;
pub mod monitor;

pub use broker::Broker;
pub use monitor::spawn_monitor;
