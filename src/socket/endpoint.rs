//! `tcp://host:port` endpoint strings

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::Error;

const TCP_SCHEME: &str = "tcp://";

/// A parsed TCP endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address suitable for `TcpListener::bind` / `TcpStream::connect`
    ///
    /// The wildcard host `*` becomes `0.0.0.0`; IPv6 literals keep their brackets.
    pub fn socket_addr(&self) -> String {
        let host = if self.host == "*" { "0.0.0.0" } else { &self.host };
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Endpoint string for an already resolved address
    pub fn format(addr: SocketAddr) -> String {
        format!("{}{}", TCP_SCHEME, addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}[{}]:{}", TCP_SCHEME, self.host, self.port)
        } else {
            write!(f, "{}{}:{}", TCP_SCHEME, self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidEndpoint(s.to_string());

        let rest = s.strip_prefix(TCP_SCHEME).ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }
}
