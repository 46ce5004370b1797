//! Legacy layout migration.
//!
//! Older installations kept everything under `.claude-wm/`. The migrator
//! classifies each path there, plans copy/convert/ignore actions, and
//! applies them through the atomic substrate:
//!
//! | legacy prefix | category | destination |
//! |---|---|---|
//! | `system/` | system template | `.wm/baseline/` |
//! | `user/` | user override | `.wm/user/` |
//! | `runtime/` | generated | ignored (regenerated on next sync) |
//! | `cache/`, `backup/` | transient | ignored |
//! | `meta.json` | metadata | `.wm/meta.json`, converted |
//! | anything else | unknown | ignored, with a reason |
//!
//! Conversion of `meta.json` fills in the current tool fields and drops the
//! legacy-only ones; `installed_at` is carried over when parseable. After a
//! fully successful migration, `--archive` renames the legacy root to
//! `<legacy>.bak` (refusing if that name is taken).

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::fsio::atomic::write_atomic;
use crate::meta::ProjectMeta;
use crate::model::tree::{DirTree, TreeError, TreeSource};
use crate::model::types::TreePath;
use crate::project::ProjectLayout;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What a legacy path is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyCategory {
    /// `system/…` — becomes the baseline.
    SystemTemplate,
    /// `user/…` — user overrides, carried as-is.
    UserOverride,
    /// `runtime/…` — derived state, regenerated later.
    Generated,
    /// `cache/…`, `backup/…` — never migrated.
    Transient,
    /// The legacy `meta.json`.
    Meta,
    /// Anything the table does not name.
    Unknown,
}

/// One legacy path's planned treatment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationEntry {
    /// Path relative to the legacy root.
    pub source: TreePath,
    /// Its classification.
    pub category: LegacyCategory,
    /// Destination relative to the project root, when migrated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<TreePath>,
    /// Why the path is ignored, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The full migration plan: entries plus counts, serializable for dry runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    /// The legacy root this plan was computed from.
    pub legacy_root: PathBuf,
    /// Per-path treatments, in lexicographic source order.
    pub entries: Vec<MigrationEntry>,
    /// Paths that will be copied or converted.
    pub n_migrate: usize,
    /// Paths that will be ignored.
    pub n_ignore: usize,
}

/// Options for [`apply_migration`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MigrationOptions {
    /// Rename the legacy root to `<legacy>.bak` after full success.
    pub archive_legacy: bool,
}

/// What a migration did.
#[derive(Clone, Debug, Serialize)]
pub struct MigrationOutcome {
    /// Files copied or converted.
    pub migrated: usize,
    /// Files ignored.
    pub ignored: usize,
    /// Where the legacy tree went, when archived.
    pub archived_to: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors planning or applying a migration.
#[derive(Debug)]
pub enum MigrateError {
    /// There is no legacy layout to migrate.
    NothingToMigrate {
        /// Where the legacy root was expected.
        legacy_root: PathBuf,
    },
    /// The project already has a current-layout installation.
    AlreadyInstalled {
        /// The existing metadata file.
        meta_path: PathBuf,
    },
    /// The legacy tree could not be enumerated.
    Walk(TreeError),
    /// A file operation failed.
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// `--archive` found `<legacy>.bak` already taken.
    ArchiveDestinationExists {
        /// The occupied path.
        path: PathBuf,
    },
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToMigrate { legacy_root } => {
                write!(
                    f,
                    "no legacy layout at '{}' — nothing to migrate",
                    legacy_root.display()
                )
            }
            Self::AlreadyInstalled { meta_path } => {
                write!(
                    f,
                    "project already initialized ('{}' exists); refusing to overwrite it with migrated state.\n  To fix: remove the current installation first, or skip migration.",
                    meta_path.display()
                )
            }
            Self::Walk(err) => write!(f, "failed to enumerate legacy tree: {err}"),
            Self::Io { path, source } => {
                write!(f, "migration I/O error at '{}': {source}", path.display())
            }
            Self::ArchiveDestinationExists { path } => {
                write!(
                    f,
                    "cannot archive legacy directory: '{}' already exists.\n  To fix: remove or rename it, then re-run with --archive.",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for MigrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Walk(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<TreeError> for MigrateError {
    fn from(err: TreeError) -> Self {
        Self::Walk(err)
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Classify one legacy-relative path.
#[must_use]
pub fn classify(source: &TreePath) -> MigrationEntry {
    let make = |category, destination: Option<TreePath>, reason: Option<&str>| MigrationEntry {
        source: source.clone(),
        category,
        destination,
        reason: reason.map(str::to_owned),
    };

    if source.as_str() == "meta.json" {
        return make(
            LegacyCategory::Meta,
            Some(TreePath::new(".wm/meta.json").expect("static path")),
            None,
        );
    }

    let rest = source.strip_first_component();
    match source.first_component() {
        "system" => rest.map_or_else(
            || {
                make(
                    LegacyCategory::Unknown,
                    None,
                    Some("bare 'system' entry with no content"),
                )
            },
            |rest| {
                let dest = TreePath::new(&format!(".wm/baseline/{rest}")).expect("validated parts");
                make(LegacyCategory::SystemTemplate, Some(dest), None)
            },
        ),
        "user" => rest.map_or_else(
            || {
                make(
                    LegacyCategory::Unknown,
                    None,
                    Some("bare 'user' entry with no content"),
                )
            },
            |rest| {
                let dest = TreePath::new(&format!(".wm/user/{rest}")).expect("validated parts");
                make(LegacyCategory::UserOverride, Some(dest), None)
            },
        ),
        "runtime" => make(
            LegacyCategory::Generated,
            None,
            Some("generated state; regenerated by the next sync"),
        ),
        "cache" | "backup" => make(
            LegacyCategory::Transient,
            None,
            Some("transient data; not carried forward"),
        ),
        other => make(
            LegacyCategory::Unknown,
            None,
            Some(&format!("unrecognized legacy entry '{other}'")),
        ),
    }
}

/// Walk the legacy root and plan every path's treatment.
///
/// # Errors
/// Fails if the legacy root is absent or cannot be walked.
pub fn plan_migration(legacy_root: &Path) -> Result<MigrationPlan, MigrateError> {
    if !legacy_root.is_dir() {
        return Err(MigrateError::NothingToMigrate {
            legacy_root: legacy_root.to_path_buf(),
        });
    }
    let report = DirTree::new(legacy_root).index()?;
    if let Some(first) = report.errors.first() {
        return Err(MigrateError::Io {
            path: first.path.clone(),
            source: io::Error::other(first.message.clone()),
        });
    }

    let entries: Vec<MigrationEntry> = report
        .index
        .paths()
        .map(classify)
        .collect();
    let n_migrate = entries
        .iter()
        .filter(|entry| entry.destination.is_some())
        .count();
    let n_ignore = entries.len() - n_migrate;
    Ok(MigrationPlan {
        legacy_root: legacy_root.to_path_buf(),
        entries,
        n_migrate,
        n_ignore,
    })
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Execute a migration plan against the project.
///
/// # Errors
/// Fail-stop on the first failure. The legacy tree is only renamed away
/// after every copy and the converted metadata landed.
pub fn apply_migration(
    plan: &MigrationPlan,
    layout: &ProjectLayout,
    opts: MigrationOptions,
) -> Result<MigrationOutcome, MigrateError> {
    if layout.meta_path().exists() {
        return Err(MigrateError::AlreadyInstalled {
            meta_path: layout.meta_path(),
        });
    }

    let legacy_tree = DirTree::new(&plan.legacy_root);
    let mut migrated = 0;
    let mut ignored = 0;
    let mut saw_baseline = false;
    let mut legacy_meta: Option<serde_json::Value> = None;

    for entry in &plan.entries {
        match (&entry.destination, entry.category) {
            (Some(_), LegacyCategory::Meta) => {
                let bytes = legacy_tree.read_blob(&entry.source)?;
                legacy_meta = serde_json::from_slice(&bytes).ok();
                // Conversion happens after the baseline lands; the digest
                // depends on it.
            }
            (Some(dest), _) => {
                let bytes = legacy_tree.read_blob(&entry.source)?;
                let target = dest.to_fs_path(layout.root());
                write_atomic(&target, &bytes).map_err(|source| MigrateError::Io {
                    path: target.clone(),
                    source,
                })?;
                saw_baseline |= entry.category == LegacyCategory::SystemTemplate;
                migrated += 1;
                tracing::debug!(source = %entry.source, dest = %dest, "migrated file");
            }
            (None, _) => {
                ignored += 1;
                tracing::debug!(
                    source = %entry.source,
                    reason = entry.reason.as_deref().unwrap_or(""),
                    "ignored legacy entry"
                );
            }
        }
    }

    // Convert metadata whenever the migration produced a baseline (or the
    // legacy tree carried a meta.json): a baseline without metadata would
    // assess as corrupted.
    if saw_baseline || legacy_meta.is_some() {
        let digest = layout.baseline_tree().index()?.index.digest();
        let mut meta = ProjectMeta::for_install(digest);
        if let Some(installed_at) = legacy_meta
            .as_ref()
            .and_then(|value| value.get("installed_at"))
            .and_then(|value| value.as_str())
            .and_then(|raw| raw.parse().ok())
        {
            meta.installed_at = installed_at;
        }
        meta.store(&layout.meta_path())
            .map_err(|err| MigrateError::Io {
                path: layout.meta_path(),
                source: io::Error::other(err),
            })?;
        migrated += usize::from(legacy_meta.is_some());
    }

    let archived_to = if opts.archive_legacy {
        let bak = bak_path(&plan.legacy_root);
        if bak.exists() {
            return Err(MigrateError::ArchiveDestinationExists { path: bak });
        }
        fs::rename(&plan.legacy_root, &bak).map_err(|source| MigrateError::Io {
            path: plan.legacy_root.clone(),
            source,
        })?;
        Some(bak)
    } else {
        None
    };

    tracing::info!(migrated, ignored, archived = archived_to.is_some(), "migration complete");
    Ok(MigrationOutcome {
        migrated,
        ignored,
        archived_to,
    })
}

fn bak_path(legacy_root: &Path) -> PathBuf {
    let name = legacy_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    legacy_root.with_file_name(format!("{name}.bak"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
