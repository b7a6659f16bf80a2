//! Configuration management for livecast-core

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP / WebSocket configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Signaling hub configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Stream history storage
    #[serde(default)]
    pub history: HistoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// HTTP bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port (signaling WebSocket, history API, health)
    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS origin ("*" allows any)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: Option<String>,

    /// Directory of a built front-end to serve for unmatched paths
    #[serde(default)]
    pub web_root: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            web_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Frames buffered per connection before it is disconnected
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level / env_logger filter
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.http.host.trim().is_empty() {
            return Err("HTTP host must not be empty".into());
        }

        if self.http.port == 0 {
            return Err("HTTP port must be non-zero".into());
        }

        if let Some(origin) = &self.http.cors_origin {
            if origin.trim().is_empty() {
                return Err("CORS origin must not be empty when set".into());
            }
        }

        if self.signaling.outbound_buffer == 0 {
            return Err("Signaling outbound buffer must be non-zero".into());
        }

        if self.history.database_path.as_os_str().is_empty() {
            return Err("History database path must not be empty".into());
        }

        Ok(())
    }

    /// Bind address for the HTTP listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_cors_origin() -> Option<String> {
    Some("http://localhost:3000".to_string())
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_database_path() -> PathBuf {
    PathBuf::from("videos.db")
}

fn default_log_level() -> String {
    "info".to_string()
}
