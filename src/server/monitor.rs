//! Lifecycle monitor workers
//!
//! One worker per bound socket turns its [`MonitorRecord`]s into
//! `kind=monitor` bus events tagged with the socket's [`EventSource`].

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusEvent, BusHandle, EventSource};
use crate::socket::MonitorRecord;

/// Spawn a worker draining `records` until cancelled or the socket is gone
pub fn spawn_monitor(
    records: mpsc::Receiver<MonitorRecord>,
    source: EventSource,
    bus: BusHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(records, source, bus, cancel))
}

async fn run(
    mut records: mpsc::Receiver<MonitorRecord>,
    source: EventSource,
    bus: BusHandle,
    cancel: CancellationToken,
) {
    tracing::debug!(source = %source, "Monitor started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            record = records.recv() => match record {
                Some(record) => {
                    let event = BusEvent::monitor(source, &record);
                    tracing::trace!(source = %source, event = ?record.kind(), value = record.value, "Lifecycle event");
                    bus.publish(event);
                }
                // Socket closed and all of its tasks ended
                None => break,
            },
        }
    }

    tracing::debug!(source = %source, "Monitor stopped");
}
