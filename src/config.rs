//! Configuration loading and validation.
//!
//! Centinela runs on a single human-owned `config.toml`. Every field has a
//! production default, so a missing file section never changes behavior
//! silently.

use std::path::Path;

use serde::Deserialize;

use crate::kernel::idempotency::IdempotencyConfig;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Idempotency window tuning.
    #[serde(default)]
    pub idempotency: IdempotencySettings,

    /// Audit trail output.
    #[serde(default)]
    pub audit: AuditSettings,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Idempotency windows, in seconds.
#[derive(Debug, Deserialize)]
pub struct IdempotencySettings {
    /// How long a resolved record answers for its command id.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How long a PENDING record blocks concurrent runs.
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            pending_timeout_secs: default_pending_timeout_secs(),
        }
    }
}

impl IdempotencySettings {
    /// Convert into the engine's config. Values are clamped to the i64
    /// range chrono durations require.
    pub fn to_engine_config(&self) -> IdempotencyConfig {
        IdempotencyConfig {
            ttl: chrono::Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX)),
            pending_timeout: chrono::Duration::seconds(
                i64::try_from(self.pending_timeout_secs).unwrap_or(i64::MAX),
            ),
        }
    }
}

/// Audit trail output settings.
#[derive(Debug, Deserialize)]
pub struct AuditSettings {
    /// Path of the append-only JSONL audit file.
    #[serde(default = "default_audit_path")]
    pub path: String,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self { path: default_audit_path() }
    }
}

/// Logging output settings.
#[derive(Debug, Deserialize)]
pub struct LoggingSettings {
    /// Directory for rotated JSON log files.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { logs_dir: default_logs_dir() }
    }
}

// Default value functions for serde

fn default_ttl_secs() -> u64 {
    86_400
}
fn default_pending_timeout_secs() -> u64 {
    300
}
fn default_audit_path() -> String {
    "audit.jsonl".to_owned()
}
fn default_logs_dir() -> String {
    "logs".to_owned()
}

/// Load the configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}
