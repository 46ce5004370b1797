//! The unified error type and exit-code mapping.
//!
//! Subsystem errors (lock, tree, meta, apply, backup, migrate, recovery,
//! config) convert into [`WmError`] without losing their cause chains. The
//! command surface turns a `WmError` into a formatted message plus a process
//! exit code:
//!
//! | code | meaning |
//! |---|---|
//! | 0 | success |
//! | 2 | precondition failure (not installed, already installed, corrupted) |
//! | 3 | I/O failure |
//! | 4 | merge conflict the policy refused to auto-resolve |
//! | 5 | lock timeout |

use std::fmt;
use std::path::PathBuf;

use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::fsio::lock::LockError;
use crate::merge::apply::ApplyError;
use crate::meta::MetaError;
use crate::migrate::MigrateError;
use crate::model::tree::TreeError;
use crate::recovery::RecoveryError;

/// Exit code for precondition failures.
pub const EXIT_PRECONDITION: u8 = 2;
/// Exit code for I/O failures.
pub const EXIT_IO: u8 = 3;
/// Exit code for unresolved merge conflicts.
pub const EXIT_CONFLICT: u8 = 4;
/// Exit code for lock timeouts.
pub const EXIT_LOCK: u8 = 5;

// ---------------------------------------------------------------------------
// WmError
// ---------------------------------------------------------------------------

/// Unified error type for all engine operations.
#[derive(Debug)]
pub enum WmError {
    /// The project has no installation to operate on.
    NotInstalled {
        /// The project root.
        root: PathBuf,
    },
    /// The project already has an installation.
    AlreadyInstalled {
        /// The project root.
        root: PathBuf,
    },
    /// The project's on-disk state is inconsistent.
    Corrupted {
        /// What is wrong.
        detail: String,
    },
    /// The update plan contains conflicts and the policy is `abort`.
    ConflictsAbort {
        /// How many paths conflict.
        count: usize,
    },
    /// Lock acquisition failed.
    Lock(LockError),
    /// Tree enumeration or blob access failed.
    Tree(TreeError),
    /// Metadata load/store failed.
    Meta(MetaError),
    /// Configuration file failed to load.
    Config(ConfigError),
    /// Plan application failed.
    Apply(ApplyError),
    /// Snapshot creation or extraction failed.
    Backup(BackupError),
    /// Legacy migration failed.
    Migrate(MigrateError),
    /// Recovery-point operation failed.
    Recovery(RecoveryError),
    /// A filesystem operation outside the other categories failed.
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
}

impl WmError {
    /// The process exit code this error maps to.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::NotInstalled { .. }
            | Self::AlreadyInstalled { .. }
            | Self::Corrupted { .. }
            | Self::Config(_) => EXIT_PRECONDITION,

            Self::ConflictsAbort { .. } => EXIT_CONFLICT,

            Self::Lock(LockError::Timeout { .. } | LockError::Blocked { .. }) => EXIT_LOCK,
            Self::Lock(_) => EXIT_IO,

            Self::Meta(MetaError::Missing { .. } | MetaError::Corrupt { .. }) => EXIT_PRECONDITION,
            Self::Meta(MetaError::Io { .. }) => EXIT_IO,

            Self::Apply(ApplyError::ManualConflicts { .. }) => EXIT_CONFLICT,
            Self::Apply(_) => EXIT_IO,

            Self::Tree(_)
            | Self::Backup(_)
            | Self::Migrate(_)
            | Self::Recovery(_)
            | Self::Io { .. } => EXIT_IO,
        }
    }
}

impl fmt::Display for WmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled { root } => {
                write!(
                    f,
                    "no installation found under '{}'.\n  To fix: run `claude-wm config install` first.",
                    root.display()
                )
            }
            Self::AlreadyInstalled { root } => {
                write!(
                    f,
                    "'{}' is already installed.\n  To fix: run `claude-wm config update` to refresh it, or remove .wm/ to start over.",
                    root.display()
                )
            }
            Self::Corrupted { detail } => {
                write!(
                    f,
                    "project state is corrupted: {detail}\n  To fix: run `claude-wm recover`, or restore from a backup under .wm/backups/."
                )
            }
            Self::ConflictsAbort { count } => {
                write!(
                    f,
                    "{count} path(s) conflict and the abort policy is active.\n  To fix: re-run with `--take-upstream`, drop `--strict` to keep local edits, or reconcile the files by hand."
                )
            }
            Self::Lock(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Meta(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Apply(err) => write!(f, "{err}"),
            Self::Backup(err) => write!(f, "{err}"),
            Self::Migrate(err) => write!(f, "{err}"),
            Self::Recovery(err) => write!(f, "{err}"),
            Self::Io { path, source } => {
                write!(f, "I/O error at '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for WmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lock(err) => Some(err),
            Self::Tree(err) => Some(err),
            Self::Meta(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Apply(err) => Some(err),
            Self::Backup(err) => Some(err),
            Self::Migrate(err) => Some(err),
            Self::Recovery(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<LockError> for WmError {
    fn from(err: LockError) -> Self {
        Self::Lock(err)
    }
}

impl From<TreeError> for WmError {
    fn from(err: TreeError) -> Self {
        Self::Tree(err)
    }
}

impl From<MetaError> for WmError {
    fn from(err: MetaError) -> Self {
        Self::Meta(err)
    }
}

impl From<ConfigError> for WmError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<ApplyError> for WmError {
    fn from(err: ApplyError) -> Self {
        Self::Apply(err)
    }
}

impl From<BackupError> for WmError {
    fn from(err: BackupError) -> Self {
        Self::Backup(err)
    }
}

impl From<MigrateError> for WmError {
    fn from(err: MigrateError) -> Self {
        Self::Migrate(err)
    }
}

impl From<RecoveryError> for WmError {
    fn from(err: RecoveryError) -> Self {
        Self::Recovery(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
