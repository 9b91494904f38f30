//! Connected sockets (PUB, SUB)
//!
//! A connected socket dials its endpoint exactly once. There is no
//! reconnect: when the peer goes away, sends fail with a transport error.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};
use crate::frame::{self, Multipart};
use crate::protocol::{handshake, SocketType, SubscriptionFrame, SubscriptionSet, ZmtpCodec};

use super::connection::{Connection, Delivery};
use super::endpoint::Endpoint;
use super::SocketOptions;

/// A PUB or SUB socket with one outbound connection
pub struct ConnectedSocket {
    socket_type: SocketType,
    endpoint: String,
    peer_addr: SocketAddr,
    peer_type: SocketType,
    outbound: Option<mpsc::Sender<Multipart>>,
    inbound: mpsc::Receiver<Multipart>,
    subscriptions: SubscriptionSet,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ConnectedSocket {
    pub(crate) async fn connect(
        socket_type: SocketType,
        endpoint: &str,
        options: &SocketOptions,
        context_cancel: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<Self> {
        if !matches!(socket_type, SocketType::Pub | SocketType::Sub) {
            return Err(Error::InvalidArgument(format!(
                "{} sockets cannot connect",
                socket_type
            )));
        }

        let parsed: Endpoint = endpoint.parse()?;
        let stream = TcpStream::connect(parsed.socket_addr()).await?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;

        let codec = ZmtpCodec::new(options.max_frame_size);
        let (framed, peer_type) =
            handshake(stream, socket_type, codec, options.handshake_timeout).await?;

        let cancel = context_cancel.child_token();
        let (outbound_tx, outbound_rx) = mpsc::channel(options.send_hwm.max(1));
        let (inbound_tx, inbound) = mpsc::channel(options.recv_hwm.max(1));
        let delivery = match socket_type {
            SocketType::Sub => Delivery::Upstream,
            _ => Delivery::Discard,
        };
        let connection = Connection::new(
            0,
            peer_addr,
            framed,
            outbound_rx,
            inbound_tx,
            delivery,
            cancel.clone(),
        );

        let tasks = TaskTracker::new();
        let endpoint_owned = endpoint.to_string();
        tracker.spawn(tasks.track_future(async move {
            match connection.run().await {
                Ok(reason) => {
                    tracing::debug!(endpoint = %endpoint_owned, reason = ?reason, "Connection ended")
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint_owned, error = %e, "Connection failed")
                }
            }
        }));

        tracing::debug!(socket = %socket_type, endpoint = %endpoint, peer = %peer_addr, "Socket connected");

        Ok(Self {
            socket_type,
            endpoint: endpoint.to_string(),
            peer_addr,
            peer_type,
            outbound: Some(outbound_tx),
            inbound,
            subscriptions: SubscriptionSet::new(),
            cancel,
            tasks,
        })
    }

    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Socket type the peer announced during the handshake
    pub fn peer_type(&self) -> SocketType {
        self.peer_type
    }

    /// Queue a message, waiting while the peer queue is at its high-water mark
    pub async fn send(&self, message: Multipart) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(Error::Terminated)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Terminated),
            sent = outbound.send(message) => sent.map_err(|_| self.lost()),
        }
    }

    /// Queue a message with a deadline; `CapacityExceeded` when it passes
    pub async fn send_timeout(&self, message: Multipart, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.send(message))
            .await
            .map_err(|_| Error::CapacityExceeded("send"))?
    }

    /// Start receiving topics beginning with `prefix` (SUB only)
    pub async fn subscribe(&mut self, prefix: impl Into<Bytes>) -> Result<()> {
        self.change_subscription(SubscriptionFrame::Subscribe(prefix.into()))
            .await
    }

    /// Undo one matching `subscribe` (SUB only)
    pub async fn unsubscribe(&mut self, prefix: impl Into<Bytes>) -> Result<()> {
        self.change_subscription(SubscriptionFrame::Unsubscribe(prefix.into()))
            .await
    }

    async fn change_subscription(&mut self, frame: SubscriptionFrame) -> Result<()> {
        if self.socket_type != SocketType::Sub {
            return Err(Error::InvalidArgument(format!(
                "{} sockets do not subscribe",
                self.socket_type
            )));
        }
        self.subscriptions.apply(&frame);
        self.send(vec![frame.encode()]).await
    }

    /// Wait for the next message matching the local subscriptions
    pub async fn recv(&mut self) -> Result<Multipart> {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Terminated),
                message = self.inbound.recv() => message.ok_or_else(|| self.lost())?,
            };
            if self.accepts(&message) {
                return Ok(message);
            }
        }
    }

    /// Next matching message if one is already queued
    pub fn try_recv(&mut self) -> Result<Multipart> {
        if self.cancel.is_cancelled() {
            return Err(Error::Terminated);
        }
        loop {
            match self.inbound.try_recv() {
                Ok(message) if self.accepts(&message) => return Ok(message),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return Err(Error::WouldBlock),
                Err(TryRecvError::Disconnected) => return Err(self.lost()),
            }
        }
    }

    fn accepts(&self, message: &Multipart) -> bool {
        match frame::split(message).0 {
            Some(topic) => self.subscriptions.matches(topic),
            None => false,
        }
    }

    fn lost(&self) -> Error {
        if self.cancel.is_cancelled() {
            Error::Terminated
        } else {
            Error::Transport(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("connection to {} lost", self.endpoint),
            ))
        }
    }

    /// Flush queued output for up to `linger`, then drop the connection
    pub async fn close(mut self, linger: Duration) {
        self.outbound.take();
        self.tasks.close();
        if tokio::time::timeout(linger, self.tasks.wait()).await.is_err() {
            tracing::debug!(endpoint = %self.endpoint, "Linger expired, dropping connection");
        }
        self.cancel.cancel();
        self.tasks.wait().await;
    }
}

impl fmt::Debug for ConnectedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedSocket")
            .field("socket_type", &self.socket_type)
            .field("endpoint", &self.endpoint)
            .field("peer_addr", &self.peer_addr)
            .field("peer_type", &self.peer_type)
            .finish()
    }
}

impl Drop for ConnectedSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
