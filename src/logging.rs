//! Log setup
//!
//! `RUST_LOG` wins when set; otherwise the configured `log_level` applies
//! to every target.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::error::{Error, Result};

/// Filter from `RUST_LOG`, falling back to `default_level`
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global subscriber; fails if one is already installed
pub fn init(settings: &Settings) -> Result<()> {
    let filter = env_filter(&settings.log_level);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if settings.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    installed.map_err(|e| Error::Config(format!("logging: {}", e)))
}
