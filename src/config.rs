//! Client configuration management.
//!
//! Holds the API base URL, retry/timeout tuning, session policy, and secure
//! storage location. Configuration is stored at
//! `~/.config/blocktrade-client/config.json`; tests construct it directly.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config/storage directory paths
const APP_NAME: &str = "blocktrade-client";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum retries for network errors and 5xx responses.
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Initial backoff delay in milliseconds; doubles per attempt (1s, 2s, 4s).
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Session duration before forced logout.
const DEFAULT_SESSION_DURATION_SECS: u64 = 30 * 60;

/// Lead time for the "session about to expire" warning.
const DEFAULT_WARNING_LEAD_SECS: u64 = 5 * 60;

/// Period of the background check reconciling published session state
/// against the token store.
const DEFAULT_DRIFT_POLL_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub session_duration_secs: u64,
    pub warning_lead_secs: u64,
    pub drift_poll_secs: u64,
    /// Directory for the encrypted key-value store
    pub storage_dir: PathBuf,
    /// Passphrase protecting locally persisted sensitive values.
    /// A device-local obfuscation key, not a server-side secret.
    pub storage_passphrase: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.blocktrade.com/api".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            session_duration_secs: DEFAULT_SESSION_DURATION_SECS,
            warning_lead_secs: DEFAULT_WARNING_LEAD_SECS,
            drift_poll_secs: DEFAULT_DRIFT_POLL_SECS,
            storage_dir: Self::default_storage_dir(),
            storage_passphrase: "BlockTrade2024!@#$".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
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

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn default_storage_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_NAME)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }

    pub fn warning_lead(&self) -> Duration {
        Duration::from_secs(self.warning_lead_secs)
    }

    pub fn drift_poll_period(&self) -> Duration {
        Duration::from_secs(self.drift_poll_secs)
    }
}
