//! Service configuration: defaults, then an optional JSON file, then the
//! environment. CLI flags are applied last by `main`.

use anyhow::Context;
use message_dispatch::DispatchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default Redis URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dispatchd")
}

fn default_database_path() -> PathBuf {
    base_dir().join("messages.db")
}

fn default_socket_path() -> PathBuf {
    base_dir().join("dispatchd.sock")
}

/// Configuration for the `dispatchd` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Engine settings.
    pub dispatch: DispatchConfig,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Unix socket for control commands.
    pub socket_path: PathBuf,
    /// Redis URL for the rate limiter and send cache.
    pub redis_url: String,
    /// Log level filter.
    pub log_level: String,
    /// Optional JSONL log file.
    pub log_file: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            database_path: default_database_path(),
            socket_path: default_socket_path(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_file: None,
        }
    }
}

impl ServiceConfig {
    /// Load from `path` when given, else defaults, then apply the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        self.dispatch.load_from_env();

        if let Ok(path) = std::env::var("DISPATCHD_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("DISPATCHD_SOCKET") {
            self.socket_path = PathBuf::from(path);
        }
        if let Some(url) = redis_url_from_parts(
            std::env::var("REDIS_URL").ok(),
            std::env::var("REDIS_HOST").ok(),
            std::env::var("REDIS_PORT").ok(),
        ) {
            self.redis_url = url;
        }
        if let Ok(level) = std::env::var("DISPATCHD_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(path) = std::env::var("DISPATCHD_LOG_FILE") {
            self.log_file = Some(PathBuf::from(path));
        }
    }
}

/// `REDIS_URL` wins; otherwise build one from `REDIS_HOST` and `REDIS_PORT`
/// (port defaults to 6379).
fn redis_url_from_parts(
    url: Option<String>,
    host: Option<String>,
    port: Option<String>,
) -> Option<String> {
    if let Some(url) = url.filter(|u| !u.is_empty()) {
        return Some(url);
    }
    let host = host.filter(|h| !h.is_empty())?;
    let port = port.filter(|p| !p.is_empty()).unwrap_or_else(|| "6379".to_string());
    Some(format!("redis://{}:{}", host, port))
}
