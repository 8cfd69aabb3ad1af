//! Service configuration, loaded from TOML.
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:8081"
//! workers_per_cpu = 2
//!
//! [storage]
//! data_dir = "/var/lib/cryptdrive"
//!
//! [tokens]
//! secret = "change-me"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DriveError, Result};
use crate::token::{DEFAULT_LIFETIME_SECS, DEFAULT_REFRESH_WINDOW_SECS};

pub const APP_NAME: &str = "cryptdrive";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tokens: TokenConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Worker pool size is this many workers per available CPU.
    pub workers_per_cpu: usize,
    /// Largest frame accepted before its sentinel shows up.
    pub max_frame_len: usize,
    /// How long a connection may sit between requests.
    pub idle_timeout_secs: u64,
    /// How long an upload payload may take to arrive.
    pub upload_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            workers_per_cpu: 2,
            max_frame_len: 64 * 1024 * 1024,
            idle_timeout_secs: 300,
            upload_timeout_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn worker_count(&self) -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (self.workers_per_cpu * cpus).max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Relative paths resolve against `data_dir`.
    pub database_file: PathBuf,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_NAME),
            database_file: PathBuf::from(format!("{APP_NAME}.db")),
            max_connections: 4,
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// RS256 signing key (PEM). Takes precedence over `secret`.
    pub rsa_private_key_path: Option<PathBuf>,
    pub rsa_public_key_path: Option<PathBuf>,
    pub lifetime_secs: i64,
    pub refresh_window_secs: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: None,
            rsa_private_key_path: None,
            rsa_public_key_path: None,
            lifetime_secs: DEFAULT_LIFETIME_SECS,
            refresh_window_secs: DEFAULT_REFRESH_WINDOW_SECS,
        }
    }
}

impl DriveConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| DriveError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: DriveConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.tokens.lifetime_secs <= 0 {
            return Err(DriveError::Config("tokens.lifetime_secs must be positive".into()));
        }
        if self.tokens.refresh_window_secs < 0
            || self.tokens.refresh_window_secs >= self.tokens.lifetime_secs
        {
            return Err(DriveError::Config(
                "tokens.refresh_window_secs must lie within the token lifetime".into(),
            ));
        }
        if self.server.max_frame_len == 0 {
            return Err(DriveError::Config("server.max_frame_len must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriveConfig::from_toml("").unwrap();
        assert_eq!(config.server.bind_addr.port(), 8081);
        assert_eq!(config.tokens.lifetime_secs, 600);
        assert_eq!(config.tokens.refresh_window_secs, 120);
        assert!(config.server.worker_count() >= 2);
        assert!(config.storage.database_path().ends_with("cryptdrive.db"));
    }

    #[test]
    fn test_partial_override() {
        let config = DriveConfig::from_toml(
            r#"
            [server]
            bind_addr = "0.0.0.0:9000"
            upload_timeout_secs = 5

            [storage]
            data_dir = "/tmp/drive"

            [tokens]
            secret = "s3cret"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_addr.port(), 9000);
        assert_eq!(config.server.upload_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.idle_timeout_secs, 300);
        assert_eq!(config.storage.blob_dir(), PathBuf::from("/tmp/drive/blobs"));
        assert_eq!(config.tokens.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(DriveConfig::from_toml("[tokens]\nlifetime_secs = 0").is_err());
        assert!(DriveConfig::from_toml("[tokens]\nrefresh_window_secs = 900").is_err());
        assert!(DriveConfig::from_toml("[server]\nunknown = 1").is_err());
    }
}
