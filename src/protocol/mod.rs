//! ZeroMQ wire protocol (ZMTP 3.0)
//!
//! Just enough of the protocol to act as a pub/sub proxy:
//!
//! - [`handshake`]: greeting + READY exchange, NULL security only
//! - [`codec`]: frame encoding for `tokio_util::codec::Framed`
//! - [`command`]: PING/PONG and 3.1 SUBSCRIBE/CANCEL commands
//! - [`subscription`]: in-band subscription control frames

pub mod codec;
pub mod command;
pub mod constants;
pub mod handshake;
pub mod subscription;

pub use codec::{MessageAssembler, ZmtpCodec, ZmtpFrame};
pub use command::{Command, PeerCommand};
pub use handshake::{handshake, Greeting, Ready, SocketType};
pub use subscription::{SubscriptionFrame, SubscriptionSet};
