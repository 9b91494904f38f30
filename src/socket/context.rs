//! Socket context
//!
//! Owns the cancellation token and task tracker shared by every socket it
//! creates. Terminating the context stops all of them.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};

use super::{BoundSocket, ConnectedSocket, SocketOptions, SocketType};

/// Factory and lifetime owner for sockets
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an XSUB or XPUB socket
    pub async fn bind(
        &self,
        socket_type: SocketType,
        endpoint: &str,
        options: &SocketOptions,
    ) -> Result<BoundSocket> {
        self.check_alive()?;
        BoundSocket::bind(socket_type, endpoint, options, &self.cancel, &self.tracker).await
    }

    /// Connect a PUB or SUB socket
    pub async fn connect(
        &self,
        socket_type: SocketType,
        endpoint: &str,
        options: &SocketOptions,
    ) -> Result<ConnectedSocket> {
        self.check_alive()?;
        ConnectedSocket::connect(socket_type, endpoint, options, &self.cancel, &self.tracker)
            .await
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel every socket and wait up to `timeout` for their tasks
    ///
    /// Returns `false` if some tasks were still running at the deadline.
    pub async fn terminate(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();
        let finished = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        if !finished {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Context terminated with tasks still running"
            );
        }
        finished
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_terminated() {
            Err(Error::Terminated)
        } else {
            Ok(())
        }
    }
}
