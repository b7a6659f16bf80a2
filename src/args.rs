use clap::Parser;
use std::path::PathBuf;

use crate::config;

#[derive(Parser, Debug)]
#[command(name = "livecast-core")]
#[command(author = "Livecast Team")]
#[command(version)]
#[command(about = "Signaling server for peer-to-peer live camera streams", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "livecast-core.toml")]
    pub config: PathBuf,

    /// HTTP bind address
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP port (signaling WebSocket and history API)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Stream history database file
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Apply command line overrides on top of the file configuration
    pub fn apply_overrides(&self, config: &mut config::Config) {
        if let Some(ref host) = self.host {
            config.http.host = host.clone();
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(ref database) = self.database {
            config.history.database_path = database.clone();
        }
    }
}
