//! ZMTP command frames
//!
//! A command body is `name-size(1) name data`. Only the commands a pub/sub
//! peer can send us are interpreted; everything else is surfaced as
//! [`PeerCommand::Unknown`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

use super::codec::ZmtpFrame;
use super::constants::*;

/// Raw command: name plus opaque data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub data: Bytes,
}

impl Command {
    pub fn new(name: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Parse a command frame body
    pub fn parse(body: &Bytes) -> Result<Self, ProtocolError> {
        let name_len = *body
            .first()
            .ok_or_else(|| ProtocolError::MalformedCommand("empty command".into()))?
            as usize;
        if body.len() < 1 + name_len {
            return Err(ProtocolError::MalformedCommand(
                "truncated command name".into(),
            ));
        }
        let name = std::str::from_utf8(&body[1..1 + name_len])
            .map_err(|_| ProtocolError::MalformedCommand("non-ASCII command name".into()))?
            .to_owned();

        Ok(Self {
            name,
            data: body.slice(1 + name_len..),
        })
    }

    /// Encode the command body
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.name.len() + self.data.len());
        buf.put_u8(self.name.len() as u8);
        buf.put_slice(self.name.as_bytes());
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Wrap into a command frame
    pub fn into_frame(self) -> ZmtpFrame {
        ZmtpFrame::command(self.encode())
    }
}

/// Commands a peer may send once the handshake is done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    /// Heartbeat request; must be answered with PONG carrying `context`
    Ping { ttl: u16, context: Bytes },
    /// Heartbeat answer
    Pong { context: Bytes },
    /// ZMTP 3.1 subscription
    Subscribe(Bytes),
    /// ZMTP 3.1 unsubscription
    Cancel(Bytes),
    /// Peer reported a fatal error
    Error(String),
    /// Anything we do not interpret
    Unknown(String),
}

impl PeerCommand {
    /// Interpret a raw command
    pub fn from_command(command: Command) -> Result<Self, ProtocolError> {
        let data = command.data;
        Ok(match command.name.as_str() {
            CMD_PING => {
                if data.len() < 2 {
                    return Err(ProtocolError::MalformedCommand("short PING".into()));
                }
                PeerCommand::Ping {
                    ttl: u16::from_be_bytes([data[0], data[1]]),
                    context: data.slice(2..),
                }
            }
            CMD_PONG => PeerCommand::Pong { context: data },
            CMD_SUBSCRIBE => PeerCommand::Subscribe(data),
            CMD_CANCEL => PeerCommand::Cancel(data),
            CMD_ERROR => {
                let reason = data
                    .split_first()
                    .map(|(len, rest)| {
                        let len = (*len as usize).min(rest.len());
                        String::from_utf8_lossy(&rest[..len]).into_owned()
                    })
                    .unwrap_or_default();
                PeerCommand::Error(reason)
            }
            other => PeerCommand::Unknown(other.to_owned()),
        })
    }

    /// PONG answering a PING with the given context
    pub fn pong(context: Bytes) -> Command {
        Command::new(CMD_PONG, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trip() {
        let cmd = Command::new("READY", Bytes::from_static(b"props"));
        let body = cmd.encode();
        assert_eq!(&body[..6], b"\x05READY");
        assert_eq!(Command::parse(&body).unwrap(), cmd);
    }

    #[test]
    fn test_truncated_name() {
        let body = Bytes::from_static(b"\x09READY");
        assert!(Command::parse(&body).is_err());
        assert!(Command::parse(&Bytes::new()).is_err());
    }

    #[test]
    fn test_ping_command() {
        let cmd = Command::new(CMD_PING, Bytes::from_static(b"\x00\x0actx"));
        match PeerCommand::from_command(cmd).unwrap() {
            PeerCommand::Ping { ttl, context } => {
                assert_eq!(ttl, 10);
                assert_eq!(context.as_ref(), b"ctx");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_and_cancel_commands() {
        let sub = Command::new(CMD_SUBSCRIBE, Bytes::from_static(b"news"));
        assert_eq!(
            PeerCommand::from_command(sub).unwrap(),
            PeerCommand::Subscribe(Bytes::from_static(b"news"))
        );
        let cancel = Command::new(CMD_CANCEL, Bytes::from_static(b"news"));
        assert_eq!(
            PeerCommand::from_command(cancel).unwrap(),
            PeerCommand::Cancel(Bytes::from_static(b"news"))
        );
    }

    #[test]
    fn test_error_and_unknown_commands() {
        let err = Command::new(CMD_ERROR, Bytes::from_static(b"\x04nope"));
        assert_eq!(
            PeerCommand::from_command(err).unwrap(),
            PeerCommand::Error("nope".into())
        );
        let other = Command::new("HELLO", Bytes::new());
        assert_eq!(
            PeerCommand::from_command(other).unwrap(),
            PeerCommand::Unknown("HELLO".into())
        );
    }
}
