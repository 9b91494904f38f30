//! Injection publisher
//!
//! Lets web handlers push a message into the broker's ingress endpoint
//! without doing transport I/O themselves:
//!
//! ```text
//!  publish(request) ──validate──► bounded queue ──► worker ──PUB──► ingress
//!                                                     │
//!                                                     └──► bus (source=inject)
//! ```
//!
//! Submission is fire-and-forget: once a request passes validation the
//! caller only learns whether it was queued, never whether it was sent.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, BusHandle};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::frame::{self, Encoding, Multipart};
use crate::socket::{Context, SocketType};

/// How long a caller may wait for room in the work queue
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Time allowed for the worker to exit on stop
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One message to inject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    /// Single payload frame, interpreted per `encoding`
    pub payload: Option<String>,
    pub encoding: Encoding,
    /// Base64 payload frames; takes precedence over `payload`
    pub multipart: Option<Vec<String>>,
}

impl PublishRequest {
    /// Topic with an optional UTF-8 payload
    pub fn text(topic: impl Into<String>, payload: Option<&str>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.map(str::to_owned),
            encoding: Encoding::Utf8,
            multipart: None,
        }
    }

    /// Topic with base64 payload frames
    pub fn multipart(topic: impl Into<String>, parts: Vec<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: None,
            encoding: Encoding::Utf8,
            multipart: Some(parts),
        }
    }

    /// Validate and build the frame sequence
    pub fn into_frames(self) -> Result<Multipart> {
        if self.topic.is_empty() {
            return Err(Error::InvalidArgument(
                "topic must be a non-empty string".into(),
            ));
        }
        let topic = frame::decode(&self.topic, Encoding::Utf8)?;

        // an empty multipart list defers to the single payload
        let parts = match (self.multipart, self.payload) {
            (Some(parts), _) if !parts.is_empty() => parts
                .iter()
                .map(|part| frame::decode(part, Encoding::Base64))
                .collect::<Result<Vec<_>>>()?,
            (_, Some(payload)) => vec![frame::decode(&payload, self.encoding)?],
            (_, None) => Vec::new(),
        };

        Ok(frame::assemble(topic, parts))
    }
}

/// What happened to a validated request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Handed to the worker
    Queued,
    /// Queue stayed full, or the publisher is not running
    Dropped,
}

struct Worker {
    queue: mpsc::Sender<Multipart>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the outbound connection used for injection
pub struct InjectionPublisher {
    settings: Arc<Settings>,
    bus: BusHandle,
    worker: Mutex<Option<Worker>>,
}

impl InjectionPublisher {
    pub fn new(settings: Arc<Settings>, bus: BusHandle) -> Self {
        Self {
            settings,
            bus,
            worker: Mutex::new(None),
        }
    }

    /// Start the worker with a fresh queue; a no-op while running
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let (queue, requests) = mpsc::channel(self.settings.inject_queue_size.max(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            Arc::clone(&self.settings),
            self.bus.clone(),
            requests,
            cancel.clone(),
        ));

        *worker = Some(Worker {
            queue,
            cancel,
            task,
        });
    }

    /// Stop the worker, discarding whatever is still queued
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        worker.cancel.cancel();
        drop(worker.queue);
        if tokio::time::timeout(WORKER_JOIN_TIMEOUT, worker.task)
            .await
            .is_err()
        {
            tracing::warn!("Injection worker did not stop in time");
        }
    }

    /// Whether the worker is alive; it exits on its own if it cannot connect
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|w| !w.task.is_finished())
            .unwrap_or(false)
    }

    /// Validate `request` and queue it for sending
    ///
    /// Only validation failures are errors. A full queue is waited on for
    /// a bounded time, after which the message is dropped with a warning.
    pub async fn publish(&self, request: PublishRequest) -> Result<Submission> {
        let frames = request.into_frames()?;

        let queue = self.worker.lock().as_ref().map(|w| w.queue.clone());
        let Some(queue) = queue else {
            tracing::warn!("Injection publisher not running; dropping message");
            return Ok(Submission::Dropped);
        };

        match queue.send_timeout(frames, ENQUEUE_TIMEOUT).await {
            Ok(()) => Ok(Submission::Queued),
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!("Publisher queue full; dropping message");
                Ok(Submission::Dropped)
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::warn!("Injection unavailable; dropping message");
                Ok(Submission::Dropped)
            }
        }
    }
}

async fn run(
    settings: Arc<Settings>,
    bus: BusHandle,
    mut requests: mpsc::Receiver<Multipart>,
    cancel: CancellationToken,
) {
    let ctx = Context::new();
    let endpoint = settings.inject_connect.as_str();
    let options = settings.inject_options();

    let connected = tokio::select! {
        _ = cancel.cancelled() => Err(Error::Terminated),
        result = ctx.connect(SocketType::Pub, endpoint, &options) => result,
    };
    let socket = match connected {
        Ok(socket) => socket,
        Err(Error::Terminated) => {
            ctx.terminate(WORKER_JOIN_TIMEOUT).await;
            return;
        }
        Err(e) => {
            tracing::error!(endpoint = %endpoint, error = %e, "Injection publisher failed to connect; injection disabled");
            ctx.terminate(WORKER_JOIN_TIMEOUT).await;
            return;
        }
    };
    tracing::info!(endpoint = %endpoint, "Publisher connected");

    loop {
        let frames = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frames = requests.recv() => match frames {
                Some(frames) => frames,
                None => break,
            },
        };

        let event = BusEvent::injected(&frames);
        let sent = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Terminated),
            sent = socket.send(frames) => sent,
        };
        match sent {
            Ok(()) => {
                bus.publish(event);
            }
            Err(Error::Terminated) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to send injected message; injection disabled");
                break;
            }
        }
    }

    socket.close(settings.linger()).await;
    ctx.terminate(WORKER_JOIN_TIMEOUT).await;
    tracing::debug!("Injection worker stopped");
}
