//! Bound sockets (XSUB, XPUB)
//!
//! A bound socket owns a TCP listener and one connection task per peer.
//! Peers are tracked in a shared [`PeerTable`] holding each peer's outbound
//! queue and, for XPUB, its subscription set.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};
use crate::frame::{self, Multipart};
use crate::protocol::{handshake, SocketType, SubscriptionFrame, SubscriptionSet, ZmtpCodec};

use super::connection::{handshake_failure_event, Connection, Delivery, Disconnect};
use super::endpoint::Endpoint;
use super::monitor::{MonitorRecord, MonitorSender, SocketEvent};
use super::SocketOptions;

struct PeerEntry {
    addr: SocketAddr,
    tx: mpsc::Sender<Multipart>,
    subscriptions: SubscriptionSet,
}

#[derive(Default)]
struct PeerTableInner {
    peers: HashMap<u64, PeerEntry>,
    /// Subscriptions forwarded upstream by an XSUB, replayed to new peers
    upstream: SubscriptionSet,
}

/// Peers attached to one bound socket
#[derive(Default)]
pub(crate) struct PeerTable {
    inner: Mutex<PeerTableInner>,
}

impl PeerTable {
    /// Register a peer; with `replay` the remembered upstream subscriptions
    /// are queued to it before anything else
    fn insert(&self, id: u64, addr: SocketAddr, tx: mpsc::Sender<Multipart>, replay: bool) {
        let mut inner = self.inner.lock();
        if replay {
            for frame in inner.upstream.replay() {
                let _ = tx.try_send(vec![frame.encode()]);
            }
        }
        inner.peers.insert(
            id,
            PeerEntry {
                addr,
                tx,
                subscriptions: SubscriptionSet::new(),
            },
        );
    }

    /// Forget a peer, handing back the subscriptions it held
    fn remove(&self, id: u64) -> Option<SubscriptionSet> {
        self.inner
            .lock()
            .peers
            .remove(&id)
            .map(|peer| peer.subscriptions)
    }

    /// Drop every peer's queue; connection tasks exit once they have
    /// written what was already queued
    fn clear(&self) {
        self.inner.lock().peers.clear();
    }

    pub(crate) fn apply_subscription(&self, id: u64, frame: &SubscriptionFrame) {
        if let Some(peer) = self.inner.lock().peers.get_mut(&id) {
            peer.subscriptions.apply(frame);
        }
    }

    /// XPUB routing: every peer whose subscriptions match the topic frame
    fn publish(&self, message: Multipart) -> usize {
        let topic = match frame::split(&message).0 {
            Some(topic) => topic.clone(),
            None => return 0,
        };
        let inner = self.inner.lock();
        let mut delivered = 0;
        for (id, peer) in inner.peers.iter() {
            if peer.subscriptions.matches(&topic) && offer(*id, &peer.tx, message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// XSUB routing: subscription frames go to every peer and are remembered
    fn forward_upstream(&self, message: Multipart) -> usize {
        let mut inner = self.inner.lock();
        if let Some(frame) = SubscriptionFrame::from_message(&message) {
            inner.upstream.apply(&frame);
        }
        let mut delivered = 0;
        for (id, peer) in inner.peers.iter() {
            if offer(*id, &peer.tx, message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    fn len(&self) -> usize {
        self.inner.lock().peers.len()
    }

    fn addrs(&self) -> Vec<SocketAddr> {
        self.inner.lock().peers.values().map(|p| p.addr).collect()
    }
}

fn offer(id: u64, tx: &mpsc::Sender<Multipart>, message: Multipart) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::trace!(peer_id = id, "Peer at high-water mark, message dropped");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// A listening XSUB or XPUB socket
pub struct BoundSocket {
    socket_type: SocketType,
    endpoint: String,
    local_addr: SocketAddr,
    peers: Arc<PeerTable>,
    inbound: mpsc::Receiver<Multipart>,
    monitor_rx: Option<mpsc::Receiver<MonitorRecord>>,
    /// Stops the accept loop only
    accept_cancel: CancellationToken,
    /// Stops everything belonging to this socket
    cancel: CancellationToken,
    /// Accept loop plus every peer task
    tasks: TaskTracker,
}

impl BoundSocket {
    pub(crate) async fn bind(
        socket_type: SocketType,
        endpoint: &str,
        options: &SocketOptions,
        context_cancel: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<Self> {
        if !matches!(socket_type, SocketType::XPub | SocketType::XSub) {
            return Err(Error::InvalidArgument(format!(
                "{} sockets cannot be bound",
                socket_type
            )));
        }

        let parsed: Endpoint = endpoint.parse()?;
        let listener = TcpListener::bind(parsed.socket_addr())
            .await
            .map_err(|source| Error::Bind {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (monitor, monitor_rx) = MonitorSender::channel(options.monitor_capacity);
        monitor.emit(MonitorRecord::new(
            SocketEvent::Listening,
            0,
            Endpoint::format(local_addr),
        ));

        let cancel = context_cancel.child_token();
        let accept_cancel = cancel.child_token();
        let (inbound_tx, inbound) = mpsc::channel(options.recv_hwm.max(1));
        let peers = Arc::new(PeerTable::default());
        let tasks = TaskTracker::new();

        let acceptor = Acceptor {
            socket_type,
            listener,
            local_addr,
            options: options.clone(),
            peers: Arc::clone(&peers),
            inbound: inbound_tx,
            monitor,
            cancel: cancel.clone(),
            accept_cancel: accept_cancel.clone(),
            tasks: tasks.clone(),
            tracker: tracker.clone(),
            next_peer_id: AtomicU64::new(1),
        };
        tracker.spawn(tasks.track_future(acceptor.run()));

        tracing::info!(socket = %socket_type, endpoint = %endpoint, addr = %local_addr, "Socket bound");

        Ok(Self {
            socket_type,
            endpoint: endpoint.to_string(),
            local_addr,
            peers,
            inbound,
            monitor_rx: Some(monitor_rx),
            accept_cancel,
            cancel,
            tasks,
        })
    }

    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    /// Endpoint string the socket was bound with
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Actual listening address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.peers.addrs()
    }

    /// Take the monitor channel; only the first call returns it
    pub fn take_monitor(&mut self) -> Option<mpsc::Receiver<MonitorRecord>> {
        self.monitor_rx.take()
    }

    /// Wait for the next message from any peer
    pub async fn recv(&mut self) -> Result<Multipart> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Terminated),
            message = self.inbound.recv() => message.ok_or(Error::Terminated),
        }
    }

    /// Next message if one is already queued
    pub fn try_recv(&mut self) -> Result<Multipart> {
        if self.cancel.is_cancelled() {
            return Err(Error::Terminated);
        }
        match self.inbound.try_recv() {
            Ok(message) => Ok(message),
            Err(TryRecvError::Empty) => Err(Error::WouldBlock),
            Err(TryRecvError::Disconnected) => Err(Error::Terminated),
        }
    }

    /// Route a message to peers without waiting
    ///
    /// Returns how many peers it was queued for.
    pub fn send(&self, message: Multipart) -> Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(Error::Terminated);
        }
        match self.socket_type {
            SocketType::XPub => Ok(self.peers.publish(message)),
            _ => Ok(self.peers.forward_upstream(message)),
        }
    }

    /// Stop accepting, let peers flush for up to `linger`, then abort them
    pub async fn close(self, linger: Duration) {
        self.accept_cancel.cancel();
        self.peers.clear();
        self.tasks.close();
        if tokio::time::timeout(linger, self.tasks.wait()).await.is_err() {
            tracing::debug!(endpoint = %self.endpoint, "Linger expired, aborting peers");
        }
        self.cancel.cancel();
        self.tasks.wait().await;
        tracing::debug!(endpoint = %self.endpoint, "Socket closed");
    }
}

impl fmt::Debug for BoundSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundSocket")
            .field("socket_type", &self.socket_type)
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peers.len())
            .finish()
    }
}

impl Drop for BoundSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Accept loop state, owned by the accept task
struct Acceptor {
    socket_type: SocketType,
    listener: TcpListener,
    local_addr: SocketAddr,
    options: SocketOptions,
    peers: Arc<PeerTable>,
    inbound: mpsc::Sender<Multipart>,
    monitor: MonitorSender,
    cancel: CancellationToken,
    accept_cancel: CancellationToken,
    tasks: TaskTracker,
    tracker: TaskTracker,
    next_peer_id: AtomicU64,
}

impl Acceptor {
    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.accept_cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.handle_connection(stream, peer_addr),
                    Err(e) => {
                        tracing::warn!(error = %e, addr = %self.local_addr, "Failed to accept connection");
                        let errno = e.raw_os_error();
                        self.monitor.emit(
                            MonitorRecord::new(
                                SocketEvent::AcceptFailed,
                                errno.unwrap_or_default() as u32,
                                Endpoint::format(self.local_addr),
                            )
                            .with_error(errno),
                        );
                        // Usually fd exhaustion; give the system a moment
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        self.monitor.emit(MonitorRecord::new(
            SocketEvent::Closed,
            0,
            Endpoint::format(self.local_addr),
        ));
    }

    fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let peer_id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(peer_id = peer_id, peer = %peer_addr, socket = %self.socket_type, "New connection");

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_id = peer_id, error = %e, "Failed to set TCP_NODELAY");
        }

        self.monitor.emit(MonitorRecord::new(
            SocketEvent::Accepted,
            peer_id as u32,
            Endpoint::format(peer_addr),
        ));

        let peer = Peer {
            id: peer_id,
            addr: peer_addr,
            socket_type: self.socket_type,
            options: self.options.clone(),
            peers: Arc::clone(&self.peers),
            inbound: self.inbound.clone(),
            monitor: self.monitor.clone(),
            cancel: self.cancel.clone(),
        };
        self.tracker
            .spawn(self.tasks.track_future(peer.serve(stream)));
    }
}

/// Everything a peer task needs, moved into it
struct Peer {
    id: u64,
    addr: SocketAddr,
    socket_type: SocketType,
    options: SocketOptions,
    peers: Arc<PeerTable>,
    inbound: mpsc::Sender<Multipart>,
    monitor: MonitorSender,
    cancel: CancellationToken,
}

impl Peer {
    async fn serve(self, stream: TcpStream) {
        let endpoint = Endpoint::format(self.addr);
        let codec = ZmtpCodec::new(self.options.max_frame_size);

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = handshake(stream, self.socket_type, codec, self.options.handshake_timeout) => result,
        };
        let framed: Framed<TcpStream, ZmtpCodec> = match outcome {
            Ok((framed, peer_type)) => {
                tracing::debug!(peer_id = self.id, peer_type = %peer_type, "Handshake complete");
                self.monitor.emit(MonitorRecord::new(
                    SocketEvent::HandshakeSucceeded,
                    self.id as u32,
                    endpoint.clone(),
                ));
                framed
            }
            Err(e) => {
                tracing::debug!(peer_id = self.id, peer = %self.addr, error = %e, "Handshake failed");
                self.monitor.emit(MonitorRecord::new(
                    handshake_failure_event(&e),
                    self.id as u32,
                    endpoint,
                ));
                return;
            }
        };

        let (tx, rx) = mpsc::channel(self.options.send_hwm.max(1));
        self.peers
            .insert(self.id, self.addr, tx, self.socket_type == SocketType::XSub);

        let upstream = self.inbound.clone();
        let delivery = match self.socket_type {
            SocketType::XPub => Delivery::TrackSubscriptions(Arc::clone(&self.peers)),
            _ => Delivery::Upstream,
        };
        let connection = Connection::new(
            self.id,
            self.addr,
            framed,
            rx,
            self.inbound,
            delivery,
            self.cancel.clone(),
        );

        match connection.run().await {
            Ok(Disconnect::PeerClosed) => {
                tracing::debug!(peer_id = self.id, "Peer disconnected");
            }
            Ok(reason) => {
                tracing::trace!(peer_id = self.id, reason = ?reason, "Connection released");
            }
            Err(e) => {
                tracing::debug!(peer_id = self.id, error = %e, "Connection error");
            }
        }

        let held = self.peers.remove(self.id);
        if let (SocketType::XPub, Some(held)) = (self.socket_type, held) {
            // a departed consumer's subscriptions are cancelled upstream
            for frame in held.cancellations() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    sent = upstream.send(vec![frame.encode()]) => if sent.is_err() { break },
                }
            }
        }
        self.monitor.emit(MonitorRecord::new(
            SocketEvent::Disconnected,
            self.id as u32,
            endpoint,
        ));
    }
}
