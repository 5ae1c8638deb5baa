//! Client configuration: backend endpoint and the deployment cipher key.
//!
//! One process-wide secret string keys the cipher for both locker passwords
//! and the PIN. A missing key falls back to the well-known default; any real
//! deployment must override it. An explicitly empty key is a startup
//! configuration error.

use crate::crypto::Cipher;
use crate::{LockerPassError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Fallback cipher key used when no key is configured.
pub const DEFAULT_ENCRYPTION_KEY: &str = "default_secret_key";

/// Environment override for the cipher key.
pub const ENCRYPTION_KEY_ENV: &str = "LOCKERPASS_ENCRYPTION_KEY";

/// Environment override for the backend base URL.
pub const BACKEND_URL_ENV: &str = "LOCKERPASS_BACKEND_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend_url: String,
    pub encryption_key: String,
    /// Interval between snapshot polls on the remote subscription, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8743".to_string(),
            encryption_key: DEFAULT_ENCRYPTION_KEY.to_string(),
            poll_interval_secs: 2,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| LockerPassError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Resolve the effective configuration: the file at `path` if it exists
    /// (defaults otherwise), then environment overrides on top.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::load(p)?,
            _ => Self::default(),
        };

        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            config.backend_url = url;
        }
        if let Ok(key) = std::env::var(ENCRYPTION_KEY_ENV) {
            config.encryption_key = key;
        }

        if config.encryption_key == DEFAULT_ENCRYPTION_KEY {
            warn!(
                "no encryption key configured; falling back to the built-in default \
                 (set {} to override)",
                ENCRYPTION_KEY_ENV
            );
        }

        Ok(config)
    }

    /// Build the cipher from the configured key.
    ///
    /// An empty key surfaces here as a configuration error.
    pub fn cipher(&self) -> Result<Cipher> {
        Ok(Cipher::new(&self.encryption_key)?)
    }

    /// Platform config file location: `<config dir>/LockerPass/lockerpass.toml`.
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(dirs::data_dir)
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));

        base.join("LockerPass").join("lockerpass.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.encryption_key, DEFAULT_ENCRYPTION_KEY);
        assert_eq!(config.poll_interval_secs, 2);
        assert!(config.cipher().is_ok());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "backend_url = \"https://backend.example\"\n\
             encryption_key = \"deployment-key\"\n\
             poll_interval_secs = 5"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.backend_url, "https://backend.example");
        assert_eq!(config.encryption_key, "deployment-key");
        assert_eq!(config.poll_interval_secs, 5);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend_url = [nonsense").unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(LockerPassError::Config(_))
        ));
    }

    #[test]
    fn empty_key_is_rejected_by_cipher() {
        let config = Config {
            encryption_key: String::new(),
            ..Config::default()
        };
        assert!(config.cipher().is_err());
    }
}
