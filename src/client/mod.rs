//! Client side of the hub: the injection publisher

pub mod publisher;

pub use publisher::{InjectionPublisher, PublishRequest, Submission};
