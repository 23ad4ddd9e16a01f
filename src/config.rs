//! Configuration for a ledger instance.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! [persistence]
//! quiet_period_ms = 1000
//!
//! [remote]
//! base_url = "https://shop.example.com"
//! timeout_ms = 10000
//!
//! [local]
//! data_dir = "./shop-data"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LedgerError, LedgerResult};

/// Environment variable that overrides `remote.session_token`.
pub const SESSION_TOKEN_ENV: &str = "LEDGERKEEP_SESSION_TOKEN";

/// Persistence Coordinator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Time after a save during which reconciliation stays blocked.
    pub quiet_period_ms: u64,
    /// Image payloads above this size are stripped during quota cleanup.
    pub strip_threshold_bytes: usize,
    /// Most recent records per collection whose images survive cleanup.
    pub keep_recent: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 1000,
            strip_threshold_bytes: 256 * 1024,
            keep_recent: 10,
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub const fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

/// Read Cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 300_000 }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Backup Manager settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Maximum number of retained backups.
    pub cap: usize,
    /// Interval between automatic backups.
    pub auto_interval_ms: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            cap: 30,
            auto_interval_ms: 24 * 60 * 60 * 1000,
        }
    }
}

impl BackupConfig {
    #[must_use]
    pub const fn auto_interval(&self) -> Duration {
        Duration::from_millis(self.auto_interval_ms)
    }
}

/// Sync Monitor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often the last-save marker is polled.
    pub poll_interval_ms: u64,
    /// Delay before a deferred reconciliation is attempted again.
    pub defer_retry_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            defer_retry_ms: 250,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn defer_retry(&self) -> Duration {
        Duration::from_millis(self.defer_retry_ms)
    }
}

/// Remote persistence service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Service root; requests go to `<base_url>/api/<collection>`.
    pub base_url: Option<String>,
    /// Bearer credential sent with every request.
    pub session_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            session_token: None,
            timeout_ms: 10_000,
        }
    }
}

/// Local durable store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub data_dir: Option<PathBuf>,
    /// Per-key size ceiling in bytes.
    pub per_key_quota: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            per_key_quota: 5 * 1024 * 1024,
        }
    }
}

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub persistence: PersistenceConfig,
    pub cache: CacheConfig,
    pub backup: BackupConfig,
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
}

impl LedgerConfig {
    /// Parses a TOML document and validates it.
    ///
    /// # Errors
    /// Returns `Config` if the document does not parse or fails validation.
    pub fn from_toml_str(text: &str) -> LedgerResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| LedgerError::config(format!("invalid TOML: {e}")))?;
        config.validate()
    }

    /// Reads a TOML file, applies environment overrides and validates.
    ///
    /// # Errors
    /// Returns `Config` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| LedgerError::config(format!("invalid TOML in {}: {e}", path.display())))?;
        config.with_env_overrides().validate()
    }

    /// Applies overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_session_token(std::env::var(SESSION_TOKEN_ENV).ok())
    }

    /// Replaces the session token when `token` is present and non-empty.
    #[must_use]
    pub fn with_session_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.remote.session_token = Some(token);
        }
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    /// Returns `Config` naming the first offending field.
    pub fn validate(self) -> LedgerResult<Self> {
        if self.backup.cap == 0 {
            return Err(LedgerError::config("backup.cap must be at least 1"));
        }
        if self.backup.auto_interval_ms == 0 {
            return Err(LedgerError::config("backup.auto_interval_ms must be positive"));
        }
        if self.cache.ttl_ms == 0 {
            return Err(LedgerError::config("cache.ttl_ms must be positive"));
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(LedgerError::config("sync.poll_interval_ms must be positive"));
        }
        if self.remote.timeout_ms == 0 {
            return Err(LedgerError::config("remote.timeout_ms must be positive"));
        }
        if matches!(self.remote.base_url.as_deref(), Some(url) if url.trim().is_empty()) {
            return Err(LedgerError::config("remote.base_url must not be empty"));
        }
        if self.local.per_key_quota == 0 {
            return Err(LedgerError::config("local.per_key_quota must be positive"));
        }
        Ok(self)
    }
}
