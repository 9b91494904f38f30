//! ZMTP 3.0 handshake (NULL mechanism)
//!
//! ```text
//! Peer A                                     Peer B
//!   |------- greeting (64 octets) ------------->|
//!   |<------ greeting (64 octets) --------------|
//!   |------- READY {Socket-Type: A} ----------->|
//!   |<------ READY {Socket-Type: B} ------------|
//!   |          [Handshake Complete]             |
//! ```
//!
//! Both sides send before reading, so neither order of arrival deadlocks.
//! The greeting is exchanged on the raw stream; READY already goes through
//! the frame codec, so the returned [`Framed`] carries no lost bytes.
//!
//! Reference: ZMTP 3.0 (RFC 23/ZMTP)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;

use crate::error::{Error, HandshakeError};

use super::codec::ZmtpCodec;
use super::command::Command;
use super::constants::*;

/// Socket types involved in pub/sub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Pub,
    Sub,
    XPub,
    XSub,
}

impl SocketType {
    /// Name as carried in the READY `Socket-Type` property
    pub fn as_str(&self) -> &'static str {
        match self {
            SocketType::Pub => "PUB",
            SocketType::Sub => "SUB",
            SocketType::XPub => "XPUB",
            SocketType::XSub => "XSUB",
        }
    }

    /// Whether a peer of type `peer` may talk to us
    pub fn is_compatible(&self, peer: SocketType) -> bool {
        use SocketType::*;
        matches!(
            (self, peer),
            (Pub, Sub) | (Pub, XSub) | (XPub, Sub) | (XPub, XSub) | (Sub, Pub) | (Sub, XPub)
                | (XSub, Pub)
                | (XSub, XPub)
        )
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketType {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUB" => Ok(SocketType::Pub),
            "SUB" => Ok(SocketType::Sub),
            "XPUB" => Ok(SocketType::XPub),
            "XSUB" => Ok(SocketType::XSub),
            other => Err(HandshakeError::InvalidReady(format!(
                "unsupported socket type {:?}",
                other
            ))),
        }
    }
}

/// The fixed 64-octet greeting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub major: u8,
    pub minor: u8,
    pub mechanism: String,
    pub as_server: bool,
}

impl Greeting {
    /// Our greeting: ZMTP 3.0, NULL mechanism
    pub fn null() -> Self {
        Self {
            major: VERSION_MAJOR,
            minor: VERSION_MINOR,
            mechanism: String::from_utf8_lossy(MECHANISM_NULL).into_owned(),
            as_server: false,
        }
    }

    pub fn encode(&self) -> [u8; GREETING_SIZE] {
        let mut buf = [0u8; GREETING_SIZE];
        buf[0] = SIGNATURE_START;
        buf[SIGNATURE_END_OFFSET] = SIGNATURE_END;
        buf[10] = self.major;
        buf[11] = self.minor;
        let mechanism = self.mechanism.as_bytes();
        let len = mechanism.len().min(MECHANISM_SIZE);
        buf[12..12 + len].copy_from_slice(&mechanism[..len]);
        buf[32] = self.as_server as u8;
        buf
    }

    /// Parse and validate a peer greeting
    pub fn parse(buf: &[u8; GREETING_SIZE]) -> Result<Self, HandshakeError> {
        if buf[0] != SIGNATURE_START || buf[SIGNATURE_END_OFFSET] != SIGNATURE_END {
            return Err(HandshakeError::InvalidSignature);
        }

        let (major, minor) = (buf[10], buf[11]);
        if major < VERSION_MAJOR {
            return Err(HandshakeError::UnsupportedVersion(major, minor));
        }

        let raw = &buf[12..12 + MECHANISM_SIZE];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(MECHANISM_SIZE);
        let mechanism = String::from_utf8_lossy(&raw[..end]).into_owned();
        if mechanism.as_bytes() != MECHANISM_NULL {
            return Err(HandshakeError::UnsupportedMechanism(mechanism));
        }

        Ok(Self {
            major,
            minor,
            mechanism,
            as_server: buf[32] != 0,
        })
    }
}

/// READY command with its metadata properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    pub properties: Vec<(String, Bytes)>,
}

impl Ready {
    /// READY announcing our socket type
    pub fn new(socket_type: SocketType) -> Self {
        Self {
            properties: vec![(
                PROP_SOCKET_TYPE.to_owned(),
                Bytes::from_static(socket_type.as_str().as_bytes()),
            )],
        }
    }

    /// Property lookup, names compare case-insensitively
    pub fn property(&self, name: &str) -> Option<&Bytes> {
        self.properties
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Peer's declared socket type
    pub fn socket_type(&self) -> Result<SocketType, HandshakeError> {
        let raw = self
            .property(PROP_SOCKET_TYPE)
            .ok_or_else(|| HandshakeError::InvalidReady("missing Socket-Type".into()))?;
        std::str::from_utf8(raw)
            .map_err(|_| HandshakeError::InvalidReady("non-ASCII Socket-Type".into()))?
            .parse()
    }

    pub fn to_command(&self) -> Command {
        let mut data = BytesMut::new();
        for (name, value) in &self.properties {
            data.put_u8(name.len() as u8);
            data.put_slice(name.as_bytes());
            data.put_u32(value.len() as u32);
            data.put_slice(value);
        }
        Command::new(CMD_READY, data.freeze())
    }

    pub fn from_command(command: &Command) -> Result<Self, HandshakeError> {
        if command.name != CMD_READY {
            return Err(HandshakeError::InvalidReady(format!(
                "expected READY, got {}",
                command.name
            )));
        }

        let mut data = command.data.clone();
        let mut properties = Vec::new();
        while data.has_remaining() {
            let name_len = data.get_u8() as usize;
            if data.remaining() < name_len + 4 {
                return Err(HandshakeError::InvalidReady("truncated property".into()));
            }
            let name = String::from_utf8_lossy(&data.split_to(name_len)).into_owned();
            let value_len = data.get_u32() as usize;
            if data.remaining() < value_len {
                return Err(HandshakeError::InvalidReady("truncated property value".into()));
            }
            properties.push((name, data.split_to(value_len)));
        }

        Ok(Self { properties })
    }
}

/// Run the full handshake on `stream`
///
/// Returns the framed stream ready for message traffic and the peer's
/// socket type. The whole exchange is bounded by `timeout`.
pub async fn handshake<S>(
    stream: S,
    local: SocketType,
    codec: ZmtpCodec,
    timeout: Duration,
) -> Result<(Framed<S, ZmtpCodec>, SocketType), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(timeout, exchange(stream, local, codec))
        .await
        .map_err(|_| HandshakeError::Timeout)?
}

async fn exchange<S>(
    mut stream: S,
    local: SocketType,
    codec: ZmtpCodec,
) -> Result<(Framed<S, ZmtpCodec>, SocketType), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&Greeting::null().encode())
        .await
        .map_err(|_| HandshakeError::ConnectionClosed)?;

    let mut peer_greeting = [0u8; GREETING_SIZE];
    stream
        .read_exact(&mut peer_greeting)
        .await
        .map_err(|_| HandshakeError::ConnectionClosed)?;
    Greeting::parse(&peer_greeting)?;

    let mut framed = Framed::new(stream, codec);
    framed
        .send(Ready::new(local).to_command().into_frame())
        .await
        .map_err(|_| HandshakeError::ConnectionClosed)?;

    let frame = match framed.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(Error::Protocol(e))) => return Err(HandshakeError::InvalidReady(e.to_string())),
        Some(Err(_)) | None => return Err(HandshakeError::ConnectionClosed),
    };
    if !frame.command {
        return Err(HandshakeError::InvalidReady(
            "expected a command frame".into(),
        ));
    }

    let command =
        Command::parse(&frame.body).map_err(|e| HandshakeError::InvalidReady(e.to_string()))?;
    let peer = Ready::from_command(&command)?.socket_type()?;
    if !local.is_compatible(peer) {
        return Err(HandshakeError::IncompatibleSocketType {
            local: local.to_string(),
            peer: peer.to_string(),
        });
    }

    Ok((framed, peer))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn test_greeting_layout() {
        let buf = Greeting::null().encode();
        assert_eq!(buf.len(), GREETING_SIZE);
        assert_eq!(buf[0], 0xFF);
        assert_eq!(buf[9], 0x7F);
        assert_eq!(buf[10], 3);
        assert_eq!(buf[11], 0);
        assert_eq!(&buf[12..16], b"NULL");
        assert!(buf[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_greeting_parse_round_trip() {
        let greeting = Greeting::null();
        assert_eq!(Greeting::parse(&greeting.encode()).unwrap(), greeting);
    }

    #[test]
    fn test_greeting_rejects_old_version() {
        let mut buf = Greeting::null().encode();
        buf[10] = 2;
        assert_eq!(
            Greeting::parse(&buf),
            Err(HandshakeError::UnsupportedVersion(2, 0))
        );
    }

    #[test]
    fn test_greeting_rejects_curve() {
        let mut buf = Greeting::null().encode();
        buf[12..17].copy_from_slice(b"CURVE");
        assert!(matches!(
            Greeting::parse(&buf),
            Err(HandshakeError::UnsupportedMechanism(m)) if m == "CURVE"
        ));
    }

    #[test]
    fn test_greeting_rejects_bad_signature() {
        let mut buf = Greeting::null().encode();
        buf[9] = 0;
        assert_eq!(Greeting::parse(&buf), Err(HandshakeError::InvalidSignature));
    }

    #[test]
    fn test_ready_round_trip() {
        let ready = Ready::new(SocketType::XSub);
        let cmd = ready.to_command();
        let parsed = Ready::from_command(&cmd).unwrap();
        assert_eq!(parsed, ready);
        assert_eq!(parsed.socket_type().unwrap(), SocketType::XSub);
        assert!(parsed.property("socket-type").is_some());
    }

    #[test]
    fn test_ready_truncated() {
        let cmd = Command::new(CMD_READY, Bytes::from_static(b"\x0bSocket-Type\x00\x00\x00\x09PUB"));
        assert!(Ready::from_command(&cmd).is_err());
    }

    #[test]
    fn test_socket_type_compatibility() {
        assert!(SocketType::XSub.is_compatible(SocketType::Pub));
        assert!(SocketType::XPub.is_compatible(SocketType::Sub));
        assert!(SocketType::Pub.is_compatible(SocketType::XSub));
        assert!(!SocketType::XSub.is_compatible(SocketType::Sub));
        assert!(!SocketType::XPub.is_compatible(SocketType::Pub));
    }

    #[tokio::test]
    async fn test_handshake_between_peers() {
        let (a, b) = tokio::io::duplex(1024);
        let left = handshake(a, SocketType::Pub, ZmtpCodec::default(), TIMEOUT);
        let right = handshake(b, SocketType::XSub, ZmtpCodec::default(), TIMEOUT);
        let (left, right) = tokio::join!(left, right);

        assert_eq!(left.unwrap().1, SocketType::XSub);
        assert_eq!(right.unwrap().1, SocketType::Pub);
    }

    #[tokio::test]
    async fn test_handshake_incompatible_types() {
        let (a, b) = tokio::io::duplex(1024);
        let left = handshake(a, SocketType::Sub, ZmtpCodec::default(), TIMEOUT);
        let right = handshake(b, SocketType::XSub, ZmtpCodec::default(), TIMEOUT);
        let (left, right) = tokio::join!(left, right);

        assert!(matches!(
            left,
            Err(HandshakeError::IncompatibleSocketType { .. })
        ));
        assert!(right.is_err());
    }

    #[tokio::test]
    async fn test_handshake_rejects_zmtp2_peer() {
        let mut old = Greeting::null().encode();
        old[10] = 2;
        let stream = tokio_test::io::Builder::new()
            .write(&Greeting::null().encode())
            .read(&old)
            .build();

        let result = handshake(stream, SocketType::XSub, ZmtpCodec::default(), TIMEOUT).await;
        assert!(matches!(result, Err(HandshakeError::UnsupportedVersion(2, 0))));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (a, _b) = tokio::io::duplex(1024);
        let result = handshake(
            a,
            SocketType::Pub,
            ZmtpCodec::default(),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(HandshakeError::Timeout)));
    }
}
