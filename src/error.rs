//! Error types
//!
//! One crate-wide [`Error`] with nested protocol and handshake errors. The
//! transport variants are what background workers branch on:
//!
//! - [`Error::WouldBlock`]: nothing available right now, retry later
//! - [`Error::Terminated`]: the socket or its context is shutting down
//! - [`Error::Transport`]: any other I/O failure, fatal for the owning worker

use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad caller input at a publish boundary
    #[error("{0}")]
    InvalidArgument(String),

    /// No message available on a non-blocking read
    #[error("operation would block")]
    WouldBlock,

    /// Socket or context has been shut down
    #[error("context terminated")]
    Terminated,

    /// Underlying socket I/O failure
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Peer violated the wire protocol after the handshake
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer failed the ZMTP greeting or READY exchange
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// A bounded queue was full
    #[error("{0} queue is full")]
    CapacityExceeded(&'static str),

    /// Endpoint string could not be parsed
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Binding a listening endpoint failed
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Settings could not be loaded or are inconsistent
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error only means "try again later"
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::WouldBlock)
    }

    /// Whether this error is the expected end-of-life signal
    pub fn is_terminated(&self) -> bool {
        matches!(self, Error::Terminated)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Wire-level violations detected while decoding frames
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Reserved flag bits were set
    #[error("invalid frame flags: {0:#04x}")]
    InvalidFlags(u8),

    /// Frame body exceeds the configured maximum
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: u64, max: usize },

    /// Command frame could not be parsed
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    /// A command frame arrived with the MORE flag set
    #[error("command frames cannot be multipart")]
    MultipartCommand,
}

/// Failures during the greeting / READY exchange
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    /// Greeting signature bytes were wrong
    #[error("invalid greeting signature")]
    InvalidSignature,

    /// Peer speaks a ZMTP revision older than 3.0
    #[error("unsupported ZMTP version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    /// Peer asked for a security mechanism other than NULL
    #[error("unsupported security mechanism {0:?}")]
    UnsupportedMechanism(String),

    /// Peer's first command was not READY or was malformed
    #[error("invalid READY command: {0}")]
    InvalidReady(String),

    /// Peer socket type cannot talk to ours
    #[error("incompatible socket type {peer} for {local}")]
    IncompatibleSocketType { local: String, peer: String },

    /// Handshake did not finish in time
    #[error("handshake timed out")]
    Timeout,

    /// Peer hung up mid-handshake
    #[error("connection closed during handshake")]
    ConnectionClosed,
}
