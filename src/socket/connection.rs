//! Per-peer connection task
//!
//! Runs after a successful handshake. One task per peer multiplexes:
//!
//! - frames read from the peer (reassembled into messages, commands answered)
//! - messages queued by the owning socket for this peer
//! - the socket's cancellation token

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::error::{HandshakeError, ProtocolError, Result};
use crate::frame::Multipart;
use crate::protocol::{
    Command, MessageAssembler, PeerCommand, SubscriptionFrame, ZmtpCodec, ZmtpFrame,
};

use super::listener::PeerTable;
use super::monitor::SocketEvent;

/// What happens to messages received from the peer
#[derive(Clone)]
pub(crate) enum Delivery {
    /// Hand everything to the owning socket (XSUB, SUB)
    Upstream,
    /// Record control frames in the peer's subscription set, then hand
    /// them to the owning socket; data messages are ignored (XPUB)
    TrackSubscriptions(Arc<PeerTable>),
    /// Drop everything (PUB)
    Discard,
}

/// Why a connection ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disconnect {
    /// Peer closed the TCP stream
    PeerClosed,
    /// Owning socket released this peer and all queued output was written
    Drained,
    /// Socket or context was cancelled
    Cancelled,
}

pub(crate) struct Connection<S> {
    peer_id: u64,
    peer_addr: SocketAddr,
    framed: Framed<S, ZmtpCodec>,
    outbound: mpsc::Receiver<Multipart>,
    inbound: mpsc::Sender<Multipart>,
    delivery: Delivery,
    cancel: CancellationToken,
    assembler: MessageAssembler,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        peer_id: u64,
        peer_addr: SocketAddr,
        framed: Framed<S, ZmtpCodec>,
        outbound: mpsc::Receiver<Multipart>,
        inbound: mpsc::Sender<Multipart>,
        delivery: Delivery,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            peer_id,
            peer_addr,
            framed,
            outbound,
            inbound,
            delivery,
            cancel,
            assembler: MessageAssembler::new(),
        }
    }

    /// Run until the peer leaves, the socket releases it, or cancellation
    pub(crate) async fn run(mut self) -> Result<Disconnect> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(Disconnect::Cancelled),
                frame = self.framed.next() => match frame {
                    Some(frame) => {
                        if let Some(message) = self.on_frame(frame?).await? {
                            if !self.deliver(message).await {
                                return Ok(Disconnect::Cancelled);
                            }
                        }
                    }
                    None => return Ok(Disconnect::PeerClosed),
                },
                message = self.outbound.recv() => match message {
                    Some(message) => self.write(message).await?,
                    None => return Ok(Disconnect::Drained),
                },
            }
        }
    }

    async fn on_frame(&mut self, frame: ZmtpFrame) -> Result<Option<Multipart>> {
        if !frame.command {
            return Ok(self.assembler.push(frame));
        }
        if self.assembler.is_partial() {
            return Err(ProtocolError::MalformedCommand(
                "command inside a multipart message".into(),
            )
            .into());
        }

        let command = PeerCommand::from_command(Command::parse(&frame.body)?)?;
        self.on_command(command).await
    }

    async fn on_command(&mut self, command: PeerCommand) -> Result<Option<Multipart>> {
        match command {
            PeerCommand::Ping { context, .. } => {
                self.framed
                    .send(PeerCommand::pong(context).into_frame())
                    .await?;
                Ok(None)
            }
            PeerCommand::Pong { .. } => Ok(None),
            PeerCommand::Subscribe(prefix) => {
                Ok(Some(vec![SubscriptionFrame::Subscribe(prefix).encode()]))
            }
            PeerCommand::Cancel(prefix) => {
                Ok(Some(vec![SubscriptionFrame::Unsubscribe(prefix).encode()]))
            }
            PeerCommand::Error(reason) => {
                tracing::warn!(
                    peer_id = self.peer_id,
                    peer = %self.peer_addr,
                    reason = %reason,
                    "Peer reported error"
                );
                Ok(None)
            }
            PeerCommand::Unknown(name) => {
                tracing::debug!(peer_id = self.peer_id, command = %name, "Ignoring command");
                Ok(None)
            }
        }
    }

    /// Returns false once the owning socket is gone
    async fn deliver(&mut self, message: Multipart) -> bool {
        match &self.delivery {
            Delivery::Discard => return true,
            Delivery::TrackSubscriptions(peers) => match SubscriptionFrame::from_message(&message) {
                Some(frame) => peers.apply_subscription(self.peer_id, &frame),
                None => {
                    tracing::trace!(peer_id = self.peer_id, "Ignoring data from subscriber");
                    return true;
                }
            },
            Delivery::Upstream => {}
        }

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.inbound.send(message) => sent.is_ok(),
        }
    }

    async fn write(&mut self, message: Multipart) -> Result<()> {
        self.feed(message).await?;
        // Batch whatever else is already queued into the same flush
        while let Ok(next) = self.outbound.try_recv() {
            self.feed(next).await?;
        }
        self.framed.flush().await
    }

    async fn feed(&mut self, message: Multipart) -> Result<()> {
        for frame in ZmtpFrame::from_message(message) {
            self.framed.feed(frame).await?;
        }
        Ok(())
    }
}

/// Monitor event reported for a failed handshake
pub(crate) fn handshake_failure_event(err: &HandshakeError) -> SocketEvent {
    match err {
        HandshakeError::Timeout | HandshakeError::ConnectionClosed => {
            SocketEvent::HandshakeFailedNoDetail
        }
        _ => SocketEvent::HandshakeFailedProtocol,
    }
}
