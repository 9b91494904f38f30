//! Command line

use std::path::PathBuf;

use clap::Parser;

use crate::config::Settings;

/// ZeroMQ XSUB/XPUB hub with a live web event view
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "zmqhub", version, about)]
pub struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// HTTP listen host
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log filter, e.g. `info` or `zmqhub=debug`
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Apply flags on top of loaded settings
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(host) = &self.host {
            settings.http_host = host.clone();
        }
        if let Some(port) = self.port {
            settings.http_port = port;
        }
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
        if self.log_json {
            settings.log_json = true;
        }
        settings
    }
}
