//! The `.wm/meta.json` document.
//!
//! Records which tool produced the baseline, when, and the baseline's
//! canonical digest. The file is the project's initialization marker: absent
//! means uninitialized; present but inconsistent with `.wm/baseline/` means
//! the project is corrupted and mutation is refused.
//!
//! Fields this version does not know about are carried in a flattened map
//! and rewritten verbatim, so older and newer binaries can share a project.
//! Serialization goes through `serde_json::Value`, whose object map is
//! sorted, giving byte-stable alphabetical key order; output is UTF-8, LF,
//! pretty-printed, with a trailing newline.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fsio::atomic::write_atomic;
use crate::fsio::corrupt::{self, CorruptionReport};
use crate::model::types::BlobHash;

/// The producer name stamped into `meta.json`.
pub const TOOL_NAME: &str = "claude-wm";

// ---------------------------------------------------------------------------
// ProjectMeta
// ---------------------------------------------------------------------------

/// Contents of `.wm/meta.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMeta {
    /// Producer identifier.
    pub tool: String,
    /// Version of the binary that last rewrote the baseline.
    pub tool_version: String,
    /// When the project was first installed.
    pub installed_at: DateTime<Utc>,
    /// When the baseline was last rewritten.
    pub updated_at: DateTime<Utc>,
    /// Canonical digest of the baseline tree.
    pub baseline_digest: BlobHash,
    /// Fields written by other versions, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProjectMeta {
    /// A fresh document for a just-installed baseline.
    #[must_use]
    pub fn for_install(baseline_digest: BlobHash) -> Self {
        let now = Utc::now();
        Self {
            tool: TOOL_NAME.to_owned(),
            tool_version: env!("CARGO_PKG_VERSION").to_owned(),
            installed_at: now,
            updated_at: now,
            baseline_digest,
            extra: BTreeMap::new(),
        }
    }

    /// Stamp a successful update: new digest, new `updated_at`, current
    /// tool version. `installed_at` and unknown fields ride along.
    pub fn record_update(&mut self, baseline_digest: BlobHash) {
        self.baseline_digest = baseline_digest;
        self.updated_at = Utc::now();
        self.tool_version = env!("CARGO_PKG_VERSION").to_owned();
        self.tool = TOOL_NAME.to_owned();
    }

    /// Load from `path`.
    ///
    /// # Errors
    /// [`MetaError::Missing`] if the file does not exist,
    /// [`MetaError::Corrupt`] if it does not parse (with a corruption
    /// report), [`MetaError::Io`] otherwise.
    pub fn load(path: &Path) -> Result<Self, MetaError> {
        let bytes = std::fs::read(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                MetaError::Missing {
                    path: path.to_path_buf(),
                }
            } else {
                MetaError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            // Prefer the detector's report: it carries offset + context.
            corrupt::inspect(path, &bytes).map_or_else(
                || MetaError::Corrupt {
                    path: path.to_path_buf(),
                    detail: err.to_string(),
                    report: None,
                },
                |report| MetaError::Corrupt {
                    path: path.to_path_buf(),
                    detail: report.message.clone(),
                    report: Some(report),
                },
            )
        })
    }

    /// Write to `path` atomically in canonical form.
    ///
    /// # Errors
    /// [`MetaError::Io`] on any write failure.
    pub fn store(&self, path: &Path) -> Result<(), MetaError> {
        let bytes = self.to_canonical_bytes().map_err(|err| MetaError::Io {
            path: path.to_path_buf(),
            source: io::Error::other(err),
        })?;
        write_atomic(path, &bytes).map_err(|source| MetaError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Canonical serialization: alphabetical keys, pretty, trailing LF.
    ///
    /// # Errors
    /// Returns a serialization error (unrepresentable values only).
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        // serde_json's default object map is ordered, so round-tripping
        // through Value sorts the flattened and declared fields together.
        let value = serde_json::to_value(self)?;
        let mut bytes = serde_json::to_vec_pretty(&value)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors loading or storing `meta.json`.
#[derive(Debug)]
pub enum MetaError {
    /// The file does not exist — the project is uninitialized.
    Missing {
        /// Where the file was expected.
        path: PathBuf,
    },
    /// The file exists but does not parse.
    Corrupt {
        /// The file inspected.
        path: PathBuf,
        /// Parser message.
        detail: String,
        /// Corruption report with offset and context, when derivable.
        report: Option<CorruptionReport>,
    },
    /// Reading or writing failed.
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
}

impl fmt::Display for MetaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { path } => {
                write!(
                    f,
                    "project is not initialized ('{}' not found).\n  To fix: run `claude-wm config install` first.",
                    path.display()
                )
            }
            Self::Corrupt {
                path,
                detail,
                report,
            } => {
                write!(f, "'{}' is corrupt: {detail}", path.display())?;
                if let Some(report) = report {
                    write!(f, " (byte {}, …{}…)", report.offset, report.context)?;
                }
                write!(
                    f,
                    "\n  To fix: run `claude-wm recover`, or restore the file from a backup."
                )
            }
            Self::Io { path, source } => {
                write!(f, "I/O error on '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for MetaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
