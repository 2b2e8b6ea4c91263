//! Command-line interface definition.

use std::path::PathBuf;

use clap::Parser;

/// yacal-server - one calendar for Netology, Modeus and LMS
#[derive(Debug, Parser)]
#[command(name = "yacal-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "YACAL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind, overriding `server.host`
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind, overriding `server.port`
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Log output format: pretty, compact or json
    #[arg(long)]
    pub log_format: Option<String>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,
}

impl Cli {
    /// Folds command-line overrides into a loaded config.
    pub fn apply(&self, config: &mut crate::config::AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(format) = &self.log_format {
            config.logging.format = Some(format.clone());
        }
    }
}
