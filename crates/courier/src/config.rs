//! Engine tuning knobs, loaded from an optional JSON file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable that overrides the database location.
pub const DATABASE_ENV_VAR: &str = "COURIER_DB";

/// A bounded polling loop: `attempts` checks, the `n`th wait lasting
/// `n * interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl PollConfig {
    pub const fn new(attempts: u32, interval_ms: u64) -> Self {
        Self {
            attempts,
            interval_ms,
        }
    }

    /// Linear backoff before re-checking after `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.interval_ms.saturating_mul(attempt as u64))
    }
}

/// SMB-specific timings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmbSettings {
    /// Attempts for delete/rename while the server reports a pending status.
    pub pending_retries: u32,
    /// Base delay; attempt `n` waits `n * pending_backoff_ms`.
    pub pending_backoff_ms: u64,
    /// How long the server keeps a handle after the last read.
    pub handle_release_ms: u64,
    /// Downloads above this size go to a temp file instead of memory.
    pub spool_threshold_bytes: u64,
}

impl Default for SmbSettings {
    fn default() -> Self {
        Self {
            pending_retries: 5,
            pending_backoff_ms: 500,
            handle_release_ms: 1_000,
            spool_threshold_bytes: 64 * 1024 * 1024,
        }
    }
}

impl SmbSettings {
    pub fn pending_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.pending_backoff_ms.saturating_mul(attempt as u64))
    }

    pub fn handle_release(&self) -> Duration {
        Duration::from_millis(self.handle_release_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Transfer attempts per file.
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * retry_delay_ms`.
    pub retry_delay_ms: u64,
    pub progress_flush_interval_ms: u64,
    /// Destination size verification after upload.
    pub verify: PollConfig,
    /// Verification profile for protocols whose listings trail writes.
    pub verify_lagging: PollConfig,
    /// Polling for a deleted source file to disappear from its listing.
    pub delete_confirm: PollConfig,
    pub smb: SmbSettings,
    pub ssh_connect_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1_000,
            progress_flush_interval_ms: 500,
            verify: PollConfig::new(5, 500),
            verify_lagging: PollConfig::new(10, 1_000),
            delete_confirm: PollConfig::new(5, 500),
            smb: SmbSettings::default(),
            ssh_connect_timeout_secs: 30,
            database_path: None,
        }
    }
}

impl EngineConfig {
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(attempt as u64))
    }

    pub fn progress_flush_interval(&self) -> Duration {
        Duration::from_millis(self.progress_flush_interval_ms)
    }

    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_connect_timeout_secs)
    }

    /// Database location: `COURIER_DB`, then the config file, then
    /// `~/.courier/data/courier.db`.
    pub fn resolve_database_path(&self) -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(DATABASE_ENV_VAR).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(path));
        }
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "maxAttempts must be at least 1".to_string(),
        });
    }

    if config.progress_flush_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "progressFlushIntervalMs must be greater than 0".to_string(),
        });
    }

    for (name, poll) in [
        ("verify", &config.verify),
        ("verifyLagging", &config.verify_lagging),
        ("deleteConfirm", &config.delete_confirm),
    ] {
        if poll.attempts == 0 {
            return Err(ConfigError::Validation {
                message: format!("{}.attempts must be at least 1", name),
            });
        }
    }

    if config.smb.pending_retries == 0 {
        return Err(ConfigError::Validation {
            message: "smb.pendingRetries must be at least 1".to_string(),
        });
    }

    if config.ssh_connect_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "sshConnectTimeoutSecs must be greater than 0".to_string(),
        });
    }

    Ok(())
}
