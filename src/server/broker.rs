//! Forwarding broker
//!
//! Binds the ingress (XSUB) and egress (XPUB) sockets and forwards between
//! them:
//!
//! ```text
//!  producers ──► ingress XSUB ──data──► egress XPUB ──► consumers
//!                     ▲                      │
//!                     └──── subscriptions ───┘
//! ```
//!
//! Every data message is also published on the bus as an ingress traffic
//! event. Subscription frames are forwarded but never published.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, BusHandle, EventSource};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::frame::Multipart;
use crate::socket::{BoundSocket, Context, SocketType};
use crate::stats::{BrokerStats, BrokerStatsSnapshot};

use super::monitor::spawn_monitor;

/// Messages drained per side before checking the other one again
const DRAIN_BATCH: usize = 256;

/// Time allowed for each monitor worker to exit
const MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Time allowed for the forwarding loop to hand back its sockets
const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Time allowed for context teardown after the sockets are closed
const CONTEXT_TERM_TIMEOUT: Duration = Duration::from_secs(2);

struct Running {
    ctx: Context,
    cancel: CancellationToken,
    forwarder: JoinHandle<(BoundSocket, BoundSocket)>,
    monitors: Vec<JoinHandle<()>>,
    ingress_addr: SocketAddr,
    egress_addr: SocketAddr,
}

/// XSUB/XPUB proxy that reports what it forwards
pub struct Broker {
    settings: Arc<Settings>,
    bus: BusHandle,
    stats: Arc<BrokerStats>,
    running: Mutex<Option<Running>>,
}

impl Broker {
    pub fn new(settings: Arc<Settings>, bus: BusHandle) -> Self {
        Self {
            settings,
            bus,
            stats: Arc::new(BrokerStats::new()),
            running: Mutex::new(None),
        }
    }

    /// Bind both endpoints and start forwarding
    ///
    /// Bind failures abort the start. Starting twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let ctx = Context::new();
        let mut ingress = ctx
            .bind(
                SocketType::XSub,
                &self.settings.ingress_bind,
                &self.settings.ingress_options(),
            )
            .await
            .map_err(|e| {
                tracing::error!(endpoint = %self.settings.ingress_bind, error = %e, "Failed to bind ingress");
                e
            })?;

        let mut egress = match ctx
            .bind(
                SocketType::XPub,
                &self.settings.egress_bind,
                &self.settings.egress_options(),
            )
            .await
        {
            Ok(socket) => socket,
            Err(e) => {
                tracing::error!(endpoint = %self.settings.egress_bind, error = %e, "Failed to bind egress");
                ingress.close(Duration::ZERO).await;
                ctx.terminate(CONTEXT_TERM_TIMEOUT).await;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let mut monitors = Vec::with_capacity(2);
        for (socket, source) in [
            (&mut ingress, EventSource::Ingress),
            (&mut egress, EventSource::Egress),
        ] {
            match socket.take_monitor() {
                Some(records) => monitors.push(spawn_monitor(
                    records,
                    source,
                    self.bus.clone(),
                    cancel.clone(),
                )),
                None => tracing::warn!(source = %source, "Monitor channel unavailable"),
            }
        }

        let ingress_addr = ingress.local_addr();
        let egress_addr = egress.local_addr();
        let forwarder = Forwarder {
            ingress,
            egress,
            bus: self.bus.clone(),
            stats: Arc::clone(&self.stats),
            cancel: cancel.clone(),
        };

        tracing::info!(
            ingress = %self.settings.ingress_bind,
            egress = %self.settings.egress_bind,
            "Broker running"
        );

        *running = Some(Running {
            ctx,
            cancel,
            forwarder: tokio::spawn(forwarder.run()),
            monitors,
            ingress_addr,
            egress_addr,
        });
        Ok(())
    }

    /// Stop forwarding and release everything; a no-op when not running
    ///
    /// Release order: monitors, then both sockets, then the context.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.cancel.cancel();

        for monitor in running.monitors {
            if tokio::time::timeout(MONITOR_JOIN_TIMEOUT, monitor).await.is_err() {
                tracing::warn!("Monitor did not stop in time");
            }
        }

        let linger = self.settings.linger();
        match tokio::time::timeout(LOOP_JOIN_TIMEOUT, running.forwarder).await {
            Ok(Ok((ingress, egress))) => {
                ingress.close(linger).await;
                egress.close(linger).await;
            }
            Ok(Err(e)) => tracing::error!(error = %e, "Forwarding task failed"),
            Err(_) => tracing::warn!("Forwarding loop did not stop in time"),
        }

        if !running.ctx.terminate(CONTEXT_TERM_TIMEOUT).await {
            tracing::warn!("Broker context had tasks left at shutdown");
        }
        tracing::info!("Broker stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Actual ingress address while running
    pub async fn ingress_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.ingress_addr)
    }

    /// Actual egress address while running
    pub async fn egress_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.egress_addr)
    }

    pub fn stats(&self) -> BrokerStatsSnapshot {
        self.stats.snapshot()
    }
}

enum Flow {
    Continue,
    Stop,
}

/// The forwarding loop; owns both sockets until it exits
struct Forwarder {
    ingress: BoundSocket,
    egress: BoundSocket,
    bus: BusHandle,
    stats: Arc<BrokerStats>,
    cancel: CancellationToken,
}

impl Forwarder {
    async fn run(mut self) -> (BoundSocket, BoundSocket) {
        loop {
            let flow = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Flow::Stop,
                received = self.ingress.recv() => self.on_ingress(received),
                received = self.egress.recv() => self.on_egress(received),
            };
            if let Flow::Stop = flow {
                break;
            }
        }

        tracing::debug!("Forwarding loop exited");
        (self.ingress, self.egress)
    }

    fn on_ingress(&mut self, first: Result<Multipart>) -> Flow {
        let mut next = first;
        for _ in 0..DRAIN_BATCH {
            match next {
                Ok(message) => {
                    if let Flow::Stop = self.forward_message(message) {
                        return Flow::Stop;
                    }
                }
                Err(e) => return classify("ingress", e),
            }
            next = self.ingress.try_recv();
        }
        Flow::Continue
    }

    fn on_egress(&mut self, first: Result<Multipart>) -> Flow {
        let mut next = first;
        for _ in 0..DRAIN_BATCH {
            match next {
                Ok(message) => {
                    if let Flow::Stop = self.forward_subscription(message) {
                        return Flow::Stop;
                    }
                }
                Err(e) => return classify("egress", e),
            }
            next = self.egress.try_recv();
        }
        Flow::Continue
    }

    /// Data message: ingress → egress, then onto the bus
    fn forward_message(&mut self, message: Multipart) -> Flow {
        let size = message.iter().map(|f| f.len()).sum();
        let event = BusEvent::traffic(EventSource::Ingress, &message);
        match self.egress.send(message) {
            Ok(_) => {
                self.stats.record_message(size);
                self.bus.publish(event);
                Flow::Continue
            }
            Err(e) => classify("egress", e),
        }
    }

    /// Subscription frame: egress → ingress, never published
    fn forward_subscription(&mut self, message: Multipart) -> Flow {
        match self.ingress.send(message) {
            Ok(_) => {
                self.stats.record_subscription();
                Flow::Continue
            }
            Err(e) => classify("ingress", e),
        }
    }
}

/// Decide what a socket error means for the loop
fn classify(side: &str, err: Error) -> Flow {
    match err {
        Error::WouldBlock => Flow::Continue,
        Error::Terminated => {
            tracing::debug!(side = side, "Socket terminated");
            Flow::Stop
        }
        other => {
            tracing::error!(side = side, error = %other, "Forwarding failed");
            Flow::Stop
        }
    }
}
