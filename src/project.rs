//! Project on-disk layout and readiness assessment.
//!
//! Every operation takes a [`ProjectLayout`] handle rather than raw paths;
//! the layout is the single place that knows where the trees, the metadata,
//! the lock sidecar, and the backups live under a project root:
//!
//! ```text
//! <root>/.claude/            local tree (live, user-visible)
//! <root>/.wm/baseline/       baseline tree (never hand-edited)
//! <root>/.wm/meta.json
//! <root>/.wm/backups/
//! <root>/.wm/sandbox/
//! <root>/.wm/.lock
//! <root>/.wm/config.toml
//! <root>/.wm/recovery.git
//! <root>/.claude-wm/         legacy layout (migration source only)
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::meta::{MetaError, ProjectMeta};
use crate::model::tree::{DirTree, TreeError, TreeSource};

// ---------------------------------------------------------------------------
// ProjectLayout
// ---------------------------------------------------------------------------

/// Path arithmetic for one project root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Wrap a project root directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The live local tree: `<root>/.claude/`.
    #[must_use]
    pub fn local_dir(&self) -> PathBuf {
        self.root.join(".claude")
    }

    /// The engine's own directory: `<root>/.wm/`.
    #[must_use]
    pub fn wm_dir(&self) -> PathBuf {
        self.root.join(".wm")
    }

    /// The baseline tree: `<root>/.wm/baseline/`.
    #[must_use]
    pub fn baseline_dir(&self) -> PathBuf {
        self.wm_dir().join("baseline")
    }

    /// ZIP snapshots: `<root>/.wm/backups/`.
    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.wm_dir().join("backups")
    }

    /// Reserved experimentation area: `<root>/.wm/sandbox/`.
    #[must_use]
    pub fn sandbox_dir(&self) -> PathBuf {
        self.wm_dir().join("sandbox")
    }

    /// The metadata document: `<root>/.wm/meta.json`.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.wm_dir().join("meta.json")
    }

    /// The project lock sidecar: `<root>/.wm/.lock`.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.wm_dir().join(".lock")
    }

    /// Engine settings: `<root>/.wm/config.toml`.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.wm_dir().join("config.toml")
    }

    /// The private recovery repository: `<root>/.wm/recovery.git`.
    #[must_use]
    pub fn recovery_git_dir(&self) -> PathBuf {
        self.wm_dir().join("recovery.git")
    }

    /// The legacy layout root consumed by the migrator: `<root>/.claude-wm/`.
    #[must_use]
    pub fn legacy_dir(&self) -> PathBuf {
        self.root.join(".claude-wm")
    }

    /// A tree handle for the local tree.
    #[must_use]
    pub fn local_tree(&self) -> DirTree {
        DirTree::new(self.local_dir())
    }

    /// A tree handle for the baseline tree.
    #[must_use]
    pub fn baseline_tree(&self) -> DirTree {
        DirTree::new(self.baseline_dir())
    }
}

// ---------------------------------------------------------------------------
// ProjectState
// ---------------------------------------------------------------------------

/// Whether a project can be operated on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProjectState {
    /// `meta.json` absent — nothing installed here yet.
    Uninitialized,
    /// Metadata, baseline, and digest agree.
    Ready {
        /// The verified metadata document.
        meta: ProjectMeta,
    },
    /// Metadata present but inconsistent; mutation is refused until repaired.
    Corrupted {
        /// Which consistency check failed.
        kind: CorruptionKind,
        /// What is wrong.
        detail: String,
    },
}

/// Which consistency check a corrupted project failed.
///
/// A [`CorruptionKind::DigestMismatch`] is the one self-healing case: an
/// apply that crashed after promoting files but before rewriting `meta.json`
/// leaves exactly this signature, and re-running `update` repairs it. The
/// other kinds require `recover`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorruptionKind {
    /// `meta.json` exists but does not parse or cannot be read.
    MetaUnreadable,
    /// `meta.json` exists but `.wm/baseline/` does not.
    BaselineMissing,
    /// The baseline directory has unreadable entries.
    BaselineUnreadable,
    /// The baseline hashes to a different digest than `meta.json` records.
    DigestMismatch,
}

impl ProjectState {
    /// True for [`ProjectState::Ready`].
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Ready { .. } => write!(f, "ready"),
            Self::Corrupted { detail, .. } => write!(f, "corrupted: {detail}"),
        }
    }
}

/// Assess a project: load `meta.json`, verify the baseline digest.
///
/// A missing metadata file yields `Uninitialized`; an unparseable one, a
/// missing baseline directory, or a digest mismatch yields `Corrupted`.
///
/// # Errors
/// Returns an error only for I/O failures outside the corruption taxonomy
/// (e.g. the baseline exists but cannot be walked).
pub fn assess(layout: &ProjectLayout) -> Result<ProjectState, TreeError> {
    let meta = match ProjectMeta::load(&layout.meta_path()) {
        Ok(meta) => meta,
        Err(MetaError::Missing { .. }) => return Ok(ProjectState::Uninitialized),
        Err(err @ (MetaError::Corrupt { .. } | MetaError::Io { .. })) => {
            return Ok(ProjectState::Corrupted {
                kind: CorruptionKind::MetaUnreadable,
                detail: err.to_string(),
            });
        }
    };

    let baseline_dir = layout.baseline_dir();
    if !baseline_dir.is_dir() {
        return Ok(ProjectState::Corrupted {
            kind: CorruptionKind::BaselineMissing,
            detail: format!(
                "meta.json exists but the baseline directory '{}' is missing",
                baseline_dir.display()
            ),
        });
    }

    let report = layout.baseline_tree().index()?;
    if !report.errors.is_empty() {
        return Ok(ProjectState::Corrupted {
            kind: CorruptionKind::BaselineUnreadable,
            detail: format!(
                "baseline has {} unreadable entr{}; first: {}",
                report.errors.len(),
                if report.errors.len() == 1 { "y" } else { "ies" },
                report.errors[0]
            ),
        });
    }

    let digest = report.index.digest();
    if digest != meta.baseline_digest {
        return Ok(ProjectState::Corrupted {
            kind: CorruptionKind::DigestMismatch,
            detail: format!(
                "baseline digest mismatch: meta.json records {} but the tree hashes to {digest}",
                meta.baseline_digest
            ),
        });
    }

    Ok(ProjectState::Ready { meta })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
