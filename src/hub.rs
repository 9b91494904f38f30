//! Hub: the broker and the injection publisher, started and stopped together

use std::sync::Arc;

use serde::Serialize;

use crate::bus::BusHandle;
use crate::client::{InjectionPublisher, PublishRequest, Submission};
use crate::config::Settings;
use crate::error::Result;
use crate::server::Broker;
use crate::stats::{BrokerStatsSnapshot, BusStatsSnapshot};

/// Health record served at `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    /// `ok` while started, `starting` otherwise
    pub status: &'static str,
    pub ingress_address: String,
    pub egress_address: String,
    pub inject_address: String,
    pub bus: BusStatsSnapshot,
    pub broker: BrokerStatsSnapshot,
}

pub struct Hub {
    settings: Arc<Settings>,
    bus: BusHandle,
    broker: Broker,
    publisher: InjectionPublisher,
}

impl Hub {
    pub fn new(settings: Arc<Settings>, bus: BusHandle) -> Self {
        Self {
            broker: Broker::new(Arc::clone(&settings), bus.clone()),
            publisher: InjectionPublisher::new(Arc::clone(&settings), bus.clone()),
            settings,
            bus,
        }
    }

    /// Start the broker, then the publisher
    ///
    /// A broker bind failure is returned and the publisher is not started.
    pub async fn start(&self) -> Result<()> {
        self.broker.start().await?;
        self.publisher.start();
        Ok(())
    }

    /// Stop the broker, then the publisher
    pub async fn stop(&self) {
        self.broker.stop().await;
        self.publisher.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.broker.is_running().await
    }

    /// Queue a message for injection into the ingress endpoint
    pub async fn publish(&self, request: PublishRequest) -> Result<Submission> {
        self.publisher.publish(request).await
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn publisher(&self) -> &InjectionPublisher {
        &self.publisher
    }

    pub async fn health(&self) -> Health {
        let status = if self.is_running().await { "ok" } else { "starting" };
        Health {
            status,
            ingress_address: self.settings.ingress_bind.clone(),
            egress_address: self.settings.egress_bind.clone(),
            inject_address: self.settings.inject_connect.clone(),
            bus: self.bus.stats(),
            broker: self.broker.stats(),
        }
    }
}
