//! Application configuration
//!
//! Loaded from a JSON file. Everything has a sensible default so the
//! binary can start with no file at all (SQLite next to the working
//! directory, API on 127.0.0.1:8080, no notification sinks).

use std::path::PathBuf;

use serde::Deserialize;
use tracing::trace;

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g. "127.0.0.1" or "0.0.0.0")
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS (for web dashboards)
    #[serde(default = "default_cors")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            enable_cors: default_cors(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors() -> bool {
    true
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default)
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./sentinel.db")
}

/// One outbound notification sink
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotificationConfig {
    /// Generic JSON webhook
    Webhook { url: String },

    /// Discord webhook with optional user mention
    Discord {
        url: String,
        #[serde(default)]
        user_id: Option<String>,
    },
}

impl NotificationConfig {
    fn url(&self) -> &str {
        match self {
            NotificationConfig::Webhook { url } => url,
            NotificationConfig::Discord { url, .. } => url,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Notification sinks; alerts and recoveries fan out to all of them
    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind.parse::<std::net::IpAddr>().is_err() {
            return Err(format!("invalid bind address {:?}", self.server.bind));
        }
        for sink in &self.notifications {
            let url = sink.url();
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("notification url {url:?} is not http(s)"));
            }
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("invalid configuration file: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
