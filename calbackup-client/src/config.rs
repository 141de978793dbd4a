//! Configuration management for the backup client.
//!
//! Loads configuration from a TOML file; every section and key is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Backend server URL
    #[serde(default = "default_server_url")]
    pub url: String,

    /// Request timeout for inventory fetches, in seconds. Backup and restore
    /// calls wait as long as the server needs.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// File holding the locally known backup dates
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_server_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_cache_path() -> PathBuf {
    let base = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("calbackup").join("known-backups.json")
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            url = "http://backups.internal:5000"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.url, "http://backups.internal:5000");
        assert_eq!(config.server.request_timeout_secs, 10);
        assert_eq!(config.log.level, "warn");
        assert!(config.cache.path.ends_with("calbackup/known-backups.json"));
    }

    #[test]
    fn test_from_file() -> anyhow::Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let path = temp_dir.path().join("client.toml");
        std::fs::write(
            &path,
            "[cache]\npath = \"/tmp/known.json\"\n[log]\nlevel = \"debug\"\n",
        )?;
        let config = Config::from_file(&path)?;
        assert_eq!(config.cache.path, PathBuf::from("/tmp/known.json"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.server.url, "http://localhost:5000");
        Ok(())
    }
}
