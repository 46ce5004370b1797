//! Engine configuration (`.wm/config.toml`).
//!
//! Typed settings for the knobs the engine exposes: lock timing, differ
//! concurrency, backup policy, conflict policy, recovery-point creation.
//! Missing fields use defaults; a missing file means all defaults (no
//! error). Nothing here is required for correctness.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::fsio::lock::{LockKind, LockOptions};
use crate::merge::plan::ConflictPolicy;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration, parsed from `.wm/config.toml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WmConfig {
    /// Lock acquisition settings.
    #[serde(default)]
    pub lock: LockConfig,

    /// Differ settings.
    #[serde(default)]
    pub diff: DiffConfig,

    /// Backup settings.
    #[serde(default)]
    pub backup: BackupConfig,

    /// Update/merge settings.
    #[serde(default)]
    pub update: UpdateConfig,

    /// Recovery-point settings.
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl WmConfig {
    /// Load from `path`; a missing file yields all defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError {
            path: Some(path.to_path_buf()),
            message: format!("failed to read: {err}"),
        })?;
        toml::from_str(&content).map_err(|err| ConfigError {
            path: Some(path.to_path_buf()),
            message: err.to_string(),
        })
    }

    /// Exclusive-lock options derived from the `[lock]` table.
    #[must_use]
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            kind: LockKind::Exclusive,
            timeout: Duration::from_secs(self.lock.timeout_secs),
            non_blocking: false,
            stale_timeout: Duration::from_secs(self.lock.stale_timeout_secs),
            retry_delay: Duration::from_millis(self.lock.retry_delay_ms),
        }
    }

    /// Shared-lock options derived from the `[lock]` table.
    #[must_use]
    pub fn shared_lock_options(&self) -> LockOptions {
        LockOptions {
            kind: LockKind::Shared,
            ..self.lock_options()
        }
    }
}

// ---------------------------------------------------------------------------
// LockConfig
// ---------------------------------------------------------------------------

/// `[lock]` — acquisition timing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// Give up on acquisition after this many seconds (default 30).
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,

    /// Treat a held lock as stale after this many seconds (default 300).
    #[serde(default = "default_stale_timeout_secs")]
    pub stale_timeout_secs: u64,

    /// Initial retry delay in milliseconds (default 10, doubling per retry).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lock_timeout_secs(),
            stale_timeout_secs: default_stale_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

const fn default_lock_timeout_secs() -> u64 {
    30
}

const fn default_stale_timeout_secs() -> u64 {
    300
}

const fn default_retry_delay_ms() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// DiffConfig
// ---------------------------------------------------------------------------

/// `[diff]` — walker/hasher settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffConfig {
    /// Hashing worker count; 0 (default) means `min(cores, 8)`.
    #[serde(default)]
    pub workers: usize,
}

impl DiffConfig {
    /// The effective worker count.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            crate::model::tree::default_workers()
        } else {
            self.workers
        }
    }
}

// ---------------------------------------------------------------------------
// BackupConfig
// ---------------------------------------------------------------------------

/// `[backup]` — snapshot policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Skip the pre-apply ZIP snapshot (default false). Applying a plan
    /// without a snapshot loses the only recovery artifact; leave this off
    /// unless disk space truly forbids it.
    #[serde(default)]
    pub disabled: bool,
}

// ---------------------------------------------------------------------------
// UpdateConfig
// ---------------------------------------------------------------------------

/// `[update]` — merge behavior.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateConfig {
    /// Default conflict policy when no CLI flag overrides it.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

// ---------------------------------------------------------------------------
// RecoveryConfig
// ---------------------------------------------------------------------------

/// `[recovery]` — git recovery points.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Record a recovery point after each successful update (default true;
    /// only takes effect once `.wm/recovery.git` exists).
    #[serde(default = "default_recovery_enabled")]
    pub enabled: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_recovery_enabled(),
        }
    }
}

const fn default_recovery_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A configuration file could not be loaded or parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    /// Path to the offending file, when known.
    pub path: Option<PathBuf>,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(
                f,
                "configuration error in '{}': {}\n  To fix: edit the config file and correct the issue.",
                path.display(),
                self.message
            ),
            None => write!(f, "configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
