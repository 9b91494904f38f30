//! ZMTP 3.0 protocol constants

/// Total size of the greeting exchanged by both peers
pub const GREETING_SIZE: usize = 64;

/// First octet of the greeting signature
pub const SIGNATURE_START: u8 = 0xFF;

/// Last octet of the greeting signature
pub const SIGNATURE_END: u8 = 0x7F;

/// Offset of the signature's last octet
pub const SIGNATURE_END_OFFSET: usize = 9;

/// Major protocol version we speak
pub const VERSION_MAJOR: u8 = 3;

/// Minor protocol version we advertise.
///
/// Advertising 3.0 keeps 3.1 peers on in-band subscription messages.
pub const VERSION_MINOR: u8 = 0;

/// Width of the zero-padded mechanism field
pub const MECHANISM_SIZE: usize = 20;

/// The only security mechanism supported
pub const MECHANISM_NULL: &[u8] = b"NULL";

/// Frame flag: more frames follow in this message
pub const FLAG_MORE: u8 = 0x01;

/// Frame flag: size is encoded on 8 octets
pub const FLAG_LONG: u8 = 0x02;

/// Frame flag: frame is a command
pub const FLAG_COMMAND: u8 = 0x04;

/// Bits that must never be set
pub const FLAG_RESERVED: u8 = !(FLAG_MORE | FLAG_LONG | FLAG_COMMAND);

/// Largest body that still fits the short size encoding
pub const MAX_SHORT_SIZE: usize = 255;

/// Default upper bound on a single frame body (64 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// READY command name
pub const CMD_READY: &str = "READY";

/// ERROR command name
pub const CMD_ERROR: &str = "ERROR";

/// PING command name (ZMTP 3.1 heartbeats)
pub const CMD_PING: &str = "PING";

/// PONG command name (ZMTP 3.1 heartbeats)
pub const CMD_PONG: &str = "PONG";

/// SUBSCRIBE command name (ZMTP 3.1)
pub const CMD_SUBSCRIBE: &str = "SUBSCRIBE";

/// CANCEL command name (ZMTP 3.1)
pub const CMD_CANCEL: &str = "CANCEL";

/// READY property carrying the socket type
pub const PROP_SOCKET_TYPE: &str = "Socket-Type";

/// First octet of an in-band subscribe frame
pub const SUBSCRIBE_PREFIX: u8 = 0x01;

/// First octet of an in-band unsubscribe frame
pub const UNSUBSCRIBE_PREFIX: u8 = 0x00;
