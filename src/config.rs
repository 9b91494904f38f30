//! Application settings
//!
//! Loaded once at startup, in increasing priority:
//!
//! 1. embedded `config/default.toml`
//! 2. optional file given with `--config`
//! 3. `ZMQHUB_*` environment variables
//! 4. command-line overrides (see [`crate::cli`])
//!
//! Settings are immutable after load and shared as `Arc<Settings>`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::socket::SocketOptions;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

const ENV_PREFIX: &str = "ZMQHUB";

/// Process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP listen host
    pub http_host: String,

    /// HTTP listen port
    pub http_port: u16,

    /// Endpoint producers connect to
    pub ingress_bind: String,

    /// Endpoint consumers connect to
    pub egress_bind: String,

    /// Endpoint the injection publisher dials
    pub inject_connect: String,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Largest accepted WebSocket message in bytes
    pub ws_max_msg_size: usize,

    /// Commands waiting for the event bus dispatcher
    pub event_queue_size: usize,

    /// Events buffered per event-stream client (0 evicts on first delivery)
    pub client_queue_size: usize,

    /// Injection requests waiting for the publisher worker
    pub inject_queue_size: usize,

    /// WebSocket ping interval
    pub heartbeat_interval_secs: f64,

    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines
    pub log_json: bool,

    /// Receive high-water mark on the ingress socket
    pub ingress_rcvhwm: usize,

    /// Send high-water mark per egress peer
    pub egress_sndhwm: usize,

    /// Send high-water mark of the injection connection
    pub inject_sndhwm: usize,

    /// How long sockets may flush on close
    pub linger_ms: u64,

    /// ZMTP handshake deadline
    pub handshake_timeout_ms: u64,

    /// Largest accepted ZMTP frame in bytes
    pub max_frame_size: usize,

    /// Lifecycle records buffered per monitored socket
    pub monitor_queue_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".into(),
            http_port: 8080,
            ingress_bind: "tcp://0.0.0.0:5551".into(),
            egress_bind: "tcp://0.0.0.0:5552".into(),
            inject_connect: "tcp://127.0.0.1:5551".into(),
            cors_origins: vec!["*".into()],
            ws_max_msg_size: 2 * 1024 * 1024,
            event_queue_size: 10_000,
            client_queue_size: 1000,
            inject_queue_size: 10_000,
            heartbeat_interval_secs: 15.0,
            log_level: "info".into(),
            log_json: false,
            ingress_rcvhwm: 10_000,
            egress_sndhwm: 10_000,
            inject_sndhwm: 10_000,
            linger_ms: 0,
            handshake_timeout_ms: 10_000,
            max_frame_size: 64 * 1024 * 1024,
            monitor_queue_size: 1024,
        }
    }
}

impl Settings {
    /// Load from defaults, an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`Settings::load`], reading variables from `env` instead of the
    /// process environment when given
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors_origins")
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the components cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("event_queue_size", self.event_queue_size),
            ("inject_queue_size", self.inject_queue_size),
            ("ws_max_msg_size", self.ws_max_msg_size),
            ("ingress_rcvhwm", self.ingress_rcvhwm),
            ("egress_sndhwm", self.egress_sndhwm),
            ("inject_sndhwm", self.inject_sndhwm),
            ("max_frame_size", self.max_frame_size),
            ("monitor_queue_size", self.monitor_queue_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }

        if !(self.heartbeat_interval_secs.is_finite() && self.heartbeat_interval_secs > 0.0) {
            return Err(Error::Config(
                "heartbeat_interval_secs must be positive".into(),
            ));
        }
        if Duration::try_from_secs_f64(self.heartbeat_interval_secs).is_err() {
            return Err(Error::Config(
                "heartbeat_interval_secs is out of range".into(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(Error::Config(
                "handshake_timeout_ms must be greater than 0".into(),
            ));
        }

        for (name, endpoint) in [
            ("ingress_bind", &self.ingress_bind),
            ("egress_bind", &self.egress_bind),
            ("inject_connect", &self.inject_connect),
        ] {
            endpoint
                .parse::<crate::socket::Endpoint>()
                .map_err(|e| Error::Config(format!("{}: {}", name, e)))?;
        }

        Ok(())
    }

    /// `host:port` for the HTTP listener
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Falls back to 15s when the configured value was never validated
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.heartbeat_interval_secs)
            .unwrap_or(Duration::from_secs(15))
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Options shared by every socket
    fn socket_options(&self) -> SocketOptions {
        SocketOptions::default()
            .linger(self.linger())
            .handshake_timeout(self.handshake_timeout())
            .max_frame_size(self.max_frame_size)
            .monitor_capacity(self.monitor_queue_size)
    }

    pub fn ingress_options(&self) -> SocketOptions {
        self.socket_options().recv_hwm(self.ingress_rcvhwm)
    }

    pub fn egress_options(&self) -> SocketOptions {
        self.socket_options().send_hwm(self.egress_sndhwm)
    }

    pub fn inject_options(&self) -> SocketOptions {
        self.socket_options().send_hwm(self.inject_sndhwm)
    }

    /// Set the HTTP host
    pub fn http_host(mut self, host: impl Into<String>) -> Self {
        self.http_host = host.into();
        self
    }

    /// Set the HTTP port
    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Set the ingress endpoint
    pub fn ingress_bind(mut self, endpoint: impl Into<String>) -> Self {
        self.ingress_bind = endpoint.into();
        self
    }

    /// Set the egress endpoint
    pub fn egress_bind(mut self, endpoint: impl Into<String>) -> Self {
        self.egress_bind = endpoint.into();
        self
    }

    /// Set the endpoint the injection publisher dials
    pub fn inject_connect(mut self, endpoint: impl Into<String>) -> Self {
        self.inject_connect = endpoint.into();
        self
    }

    /// Set the per-client event queue size
    pub fn client_queue_size(mut self, size: usize) -> Self {
        self.client_queue_size = size;
        self
    }

    /// Set the injection queue size
    pub fn inject_queue_size(mut self, size: usize) -> Self {
        self.inject_queue_size = size;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_secs = interval.as_secs_f64();
        self
    }

    /// Set linger on close
    pub fn linger_ms(mut self, linger_ms: u64) -> Self {
        self.linger_ms = linger_ms;
        self
    }

    /// Set the log filter
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}
