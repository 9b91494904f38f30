//! Socket lifecycle records
//!
//! Event codes match libzmq's `ZMQ_EVENT_*` values so that tooling written
//! against ZeroMQ monitors reads them the same way.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Lifecycle transitions a socket can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SocketEvent {
    Connected = 0x0001,
    ConnectDelayed = 0x0002,
    ConnectRetried = 0x0004,
    Listening = 0x0008,
    BindFailed = 0x0010,
    Accepted = 0x0020,
    AcceptFailed = 0x0040,
    Closed = 0x0080,
    CloseFailed = 0x0100,
    Disconnected = 0x0200,
    MonitorStopped = 0x0400,
    HandshakeFailedNoDetail = 0x0800,
    HandshakeSucceeded = 0x1000,
    HandshakeFailedProtocol = 0x2000,
    HandshakeFailedAuth = 0x4000,
}

const ALL_EVENTS: [SocketEvent; 15] = [
    SocketEvent::Connected,
    SocketEvent::ConnectDelayed,
    SocketEvent::ConnectRetried,
    SocketEvent::Listening,
    SocketEvent::BindFailed,
    SocketEvent::Accepted,
    SocketEvent::AcceptFailed,
    SocketEvent::Closed,
    SocketEvent::CloseFailed,
    SocketEvent::Disconnected,
    SocketEvent::MonitorStopped,
    SocketEvent::HandshakeFailedNoDetail,
    SocketEvent::HandshakeSucceeded,
    SocketEvent::HandshakeFailedProtocol,
    SocketEvent::HandshakeFailedAuth,
];

impl SocketEvent {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        ALL_EVENTS.iter().copied().find(|e| e.code() == code)
    }

    /// Lower-case name used in bus events
    pub fn name(self) -> &'static str {
        match self {
            SocketEvent::Connected => "connected",
            SocketEvent::ConnectDelayed => "connect_delayed",
            SocketEvent::ConnectRetried => "connect_retried",
            SocketEvent::Listening => "listening",
            SocketEvent::BindFailed => "bind_failed",
            SocketEvent::Accepted => "accepted",
            SocketEvent::AcceptFailed => "accept_failed",
            SocketEvent::Closed => "closed",
            SocketEvent::CloseFailed => "close_failed",
            SocketEvent::Disconnected => "disconnected",
            SocketEvent::MonitorStopped => "monitor_stopped",
            SocketEvent::HandshakeFailedNoDetail => "handshake_failed_no_detail",
            SocketEvent::HandshakeSucceeded => "handshake_succeeded",
            SocketEvent::HandshakeFailedProtocol => "handshake_failed_protocol",
            SocketEvent::HandshakeFailedAuth => "handshake_failed_auth",
        }
    }
}

/// Name for a raw event code; unknown codes render as their decimal value
pub fn event_name(code: u16) -> String {
    SocketEvent::from_code(code)
        .map(|e| e.name().to_string())
        .unwrap_or_else(|| code.to_string())
}

/// One entry read from a socket's monitor channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRecord {
    /// Raw `ZMQ_EVENT_*` code
    pub event: u16,
    /// Peer sequence number, or the OS error code for failures
    pub value: u32,
    /// Address the event refers to
    pub endpoint: Bytes,
    /// OS error code, when the event was caused by one
    pub error: Option<i32>,
}

impl MonitorRecord {
    pub fn new(event: SocketEvent, value: u32, endpoint: impl Into<Bytes>) -> Self {
        Self {
            event: event.code(),
            value,
            endpoint: endpoint.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: Option<i32>) -> Self {
        self.error = error;
        self
    }

    pub fn kind(&self) -> Option<SocketEvent> {
        SocketEvent::from_code(self.event)
    }
}

/// Producer half of a monitor channel
///
/// Emitting never waits: when the channel is full or nobody listens the
/// record is discarded.
#[derive(Debug, Clone)]
pub(crate) struct MonitorSender {
    tx: Option<mpsc::Sender<MonitorRecord>>,
}

impl MonitorSender {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<MonitorRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Sender for sockets without a monitor
    pub(crate) fn disabled() -> Self {
        Self { tx: None }
    }

    pub(crate) fn emit(&self, record: MonitorRecord) {
        if let Some(tx) = &self.tx {
            if tx.try_send(record).is_err() {
                tracing::trace!("Monitor record dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_libzmq() {
        assert_eq!(SocketEvent::Connected.code(), 0x0001);
        assert_eq!(SocketEvent::Accepted.code(), 0x0020);
        assert_eq!(SocketEvent::Disconnected.code(), 0x0200);
        assert_eq!(SocketEvent::HandshakeFailedAuth.code(), 0x4000);
    }

    #[test]
    fn test_from_code_round_trip() {
        for event in ALL_EVENTS {
            assert_eq!(SocketEvent::from_code(event.code()), Some(event));
        }
        assert_eq!(SocketEvent::from_code(0x8000), None);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(event_name(0x0020), "accepted");
        assert_eq!(event_name(0x0200), "disconnected");
        assert_eq!(event_name(0x1000), "handshake_succeeded");
        assert_eq!(event_name(12345), "12345");
    }

    #[tokio::test]
    async fn test_emit_drops_when_full() {
        let (sender, mut rx) = MonitorSender::channel(1);
        sender.emit(MonitorRecord::new(SocketEvent::Accepted, 1, "tcp://a:1"));
        sender.emit(MonitorRecord::new(SocketEvent::Disconnected, 1, "tcp://a:1"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind(), Some(SocketEvent::Accepted));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disabled_sender_is_silent() {
        let sender = MonitorSender::disabled();
        sender.emit(MonitorRecord::new(SocketEvent::Listening, 0, "tcp://*:1"));
    }

    #[test]
    fn test_record_error() {
        let record = MonitorRecord::new(SocketEvent::AcceptFailed, 24, "tcp://0.0.0.0:1")
            .with_error(Some(24));
        assert_eq!(record.error, Some(24));
        assert_eq!(record.endpoint.as_ref(), b"tcp://0.0.0.0:1");
    }
}
