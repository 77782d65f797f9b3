//! Application configuration management.
//!
//! Configuration is stored at `~/.config/repairdesk/config.json`, or at
//! `$REPAIRDESK_HOME/config.json` when that variable is set. Environment
//! variables override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{FileStore, KeyValueStore, KeyringStore};

/// Application name used for config/data directory paths
const APP_NAME: &str = "repairdesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Overrides both the config and data directories
pub const HOME_ENV: &str = "REPAIRDESK_HOME";
pub const BASE_URL_ENV: &str = "REPAIRDESK_BASE_URL";
pub const STORAGE_ENV: &str = "REPAIRDESK_STORAGE";

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Proactive refresh keeps an idle session alive; hourly is well inside the
/// backend's refresh-token lifetime.
const DEFAULT_REFRESH_INTERVAL_MINUTES: u64 = 60;

/// Longest accepted proactive refresh interval (one week)
pub const MAX_REFRESH_INTERVAL_MINUTES: u64 = 7 * 24 * 60;
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(MAX_REFRESH_INTERVAL_MINUTES * 60);

/// Keychain service name for the keyring backend
const DEFAULT_KEYRING_SERVICE: &str = "repairdesk";

/// Convert a refresh interval in minutes, rejecting zero and anything
/// above a week.
pub fn interval_from_minutes(minutes: u64) -> Result<Duration> {
    if !(1..=MAX_REFRESH_INTERVAL_MINUTES).contains(&minutes) {
        return Err(anyhow::anyhow!(
            "Refresh interval must be between 1 and {MAX_REFRESH_INTERVAL_MINUTES} minutes, got {minutes}"
        ));
    }
    Ok(Duration::from_secs(minutes * 60))
}

/// Where the session is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" | "keychain" => Ok(StorageBackend::Keyring),
            other => Err(anyhow::anyhow!("Unknown storage backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub storage: StorageBackend,
    /// `None` disables the proactive refresh timer
    pub refresh_interval_minutes: Option<u64>,
    pub request_timeout_secs: u64,
    /// Keychain service name, e.g. one per backend deployment
    pub keyring_service: String,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            storage: StorageBackend::File,
            refresh_interval_minutes: Some(DEFAULT_REFRESH_INTERVAL_MINUTES),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            last_username: None,
        }
    }
}

impl Config {
    /// Load the config file (defaults if missing), then apply env overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env()?;
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings that cannot be used as-is
    pub fn validate(&self) -> Result<()> {
        if let Some(minutes) = self.refresh_interval_minutes.filter(|m| *m > 0) {
            interval_from_minutes(minutes)?;
        }
        if self.keyring_service.trim().is_empty() {
            return Err(anyhow::anyhow!("keyring_service must not be empty"));
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(storage) = std::env::var(STORAGE_ENV) {
            self.storage = storage.parse()?;
        }
        Ok(())
    }

    fn home_override() -> Option<PathBuf> {
        std::env::var_os(HOME_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    pub fn config_path() -> Result<PathBuf> {
        if let Some(home) = Self::home_override() {
            return Ok(home.join(CONFIG_FILE));
        }
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the session file
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(home) = Self::home_override() {
            return Ok(home);
        }
        let data_dir =
            dirs::data_dir().ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Build the configured session storage backend
    pub fn open_storage(&self) -> Result<Box<dyn KeyValueStore>> {
        Ok(match self.storage {
            StorageBackend::File => Box::new(FileStore::new(&self.data_dir()?)),
            StorageBackend::Keyring => Box::new(KeyringStore::with_service(&self.keyring_service)),
        })
    }

    /// Absolute URL for an API path, tolerant of slashes on either side
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Proactive refresh interval; `None` when disabled (null or 0) or out
    /// of range
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_minutes
            .and_then(|m| interval_from_minutes(m).ok())
    }
}
