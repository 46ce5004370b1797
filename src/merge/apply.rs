//! Plan application: backup → stage → promote → mirror baseline → meta.
//!
//! The applier is strictly sequential per plan and fail-stop: the first
//! error halts everything. Safety comes from ordering, not rollback:
//!
//! 1. **Backup** the local tree to a ZIP before anything mutates. A failed
//!    backup aborts the whole apply.
//! 2. **Stage** every incoming blob as a temp file next to its destination,
//!    fsynced. Nothing user-visible changes yet.
//! 3. **Promote** in plan order: unlink deletes (deepest first), prune
//!    now-empty directories, then rename staged temps into place
//!    (shallowest first). Each rename is atomic; a crash leaves a clean
//!    prefix of the plan applied.
//! 4. **Mirror the baseline**: the same logical changes land in
//!    `.wm/baseline/` through the atomic-write substrate, converging the
//!    baseline to upstream on every non-filtered path.
//! 5. **Meta last**: the baseline digest is recomputed from disk and
//!    `meta.json` rewritten. A crash before this step leaves meta pointing
//!    at the old baseline, which the next run detects and repairs by
//!    planning again.
//!
//! Every per-path action re-checks the on-disk hash first, so re-applying a
//! plan whose targets already match is a no-op.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::backup::{self, BackupError};
use crate::fsio::atomic::{self, write_atomic};
use crate::meta::{MetaError, ProjectMeta};
use crate::model::tree::{TreeEntryKind, TreeError, TreeSource};
use crate::model::types::{BlobHash, TreePath};
use crate::project::ProjectLayout;

use super::plan::{Plan, PlanSummary};

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, checked between file operations.
///
/// The binary registers this for SIGINT/SIGTERM; an in-flight single file
/// operation completes, then the apply halts at the next boundary with the
/// backup intact and all completed renames in place.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// The shared flag, for signal-handler registration.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    fn check(&self) -> Result<(), ApplyError> {
        if self.is_canceled() {
            Err(ApplyError::Canceled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Options / outcome
// ---------------------------------------------------------------------------

/// Applier knobs.
#[derive(Clone, Debug)]
pub struct ApplyOptions {
    /// Snapshot the local tree before mutating (default true).
    pub backup: bool,
    /// Cooperative cancellation flag.
    pub cancel: CancelToken,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            backup: true,
            cancel: CancelToken::new(),
        }
    }
}

/// What an apply actually did.
#[derive(Clone, Debug, Serialize)]
pub struct ApplyOutcome {
    /// The plan's aggregate counts.
    pub summary: PlanSummary,
    /// Local files written (after idempotence skips).
    pub files_written: usize,
    /// Local files removed.
    pub files_deleted: usize,
    /// The snapshot taken before mutation, if any.
    pub backup_path: Option<PathBuf>,
    /// The baseline digest recorded in `meta.json`.
    pub baseline_digest: BlobHash,
}

/// The manifest written next to each pre-apply backup.
#[derive(Serialize)]
struct BackupManifest<'a> {
    archive: &'a Path,
    created_at: chrono::DateTime<chrono::Utc>,
    plan: &'a PlanSummary,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors during plan application.
#[derive(Debug)]
pub enum ApplyError {
    /// The pre-apply snapshot failed; nothing was mutated.
    Backup(BackupError),
    /// The plan still contains unresolved conflicts.
    ManualConflicts {
        /// How many entries are unresolved.
        count: usize,
    },
    /// Cancellation was requested between file operations.
    Canceled,
    /// Reading an upstream blob failed.
    Upstream(TreeError),
    /// A local or baseline file operation failed.
    Io {
        /// The path being mutated.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// Rewriting `meta.json` failed.
    Meta(MetaError),
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backup(err) => {
                write!(f, "backup failed, apply aborted before any mutation: {err}")
            }
            Self::ManualConflicts { count } => {
                write!(
                    f,
                    "{count} unresolved conflict(s) in the plan.\n  To fix: re-run with a conflict policy (keep local or take upstream), or reconcile the files by hand."
                )
            }
            Self::Canceled => write!(f, "apply canceled; completed changes remain in place"),
            Self::Upstream(err) => write!(f, "failed to read upstream blob: {err}"),
            Self::Io { path, source } => {
                write!(f, "apply I/O error at '{}': {source}", path.display())
            }
            Self::Meta(err) => write!(f, "failed to update metadata: {err}"),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backup(err) => Some(err),
            Self::Upstream(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::Meta(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BackupError> for ApplyError {
    fn from(err: BackupError) -> Self {
        Self::Backup(err)
    }
}

impl From<TreeError> for ApplyError {
    fn from(err: TreeError) -> Self {
        Self::Upstream(err)
    }
}

impl From<MetaError> for ApplyError {
    fn from(err: MetaError) -> Self {
        Self::Meta(err)
    }
}

// ---------------------------------------------------------------------------
// Staged writes
// ---------------------------------------------------------------------------

enum Staged {
    File {
        path: TreePath,
        dest: PathBuf,
        tmp: tempfile::NamedTempFile,
    },
    Link {
        path: TreePath,
        dest: PathBuf,
        target: String,
    },
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Execute `plan` against the project.
///
/// Preconditions (enforced by the caller): the exclusive project lock is
/// held and the project assessed as ready.
///
/// # Errors
/// Fail-stop on the first failure; see [`ApplyError`]. After a post-backup
/// failure, the backup archive is the recovery artifact.
pub fn apply(
    plan: &Plan,
    upstream: &dyn TreeSource,
    layout: &ProjectLayout,
    meta: &mut ProjectMeta,
    opts: &ApplyOptions,
) -> Result<ApplyOutcome, ApplyError> {
    if plan.has_manual_conflicts() {
        return Err(ApplyError::ManualConflicts {
            count: plan.summary.n_conflict,
        });
    }

    // ------------------------------------------------------------------
    // 1. Backup
    // ------------------------------------------------------------------
    let backup_path = if opts.backup {
        let archive = match backup::create_backup(&layout.local_dir(), &layout.backups_dir()) {
            Ok(archive) => archive,
            Err(err) => {
                // One retry under a fresh timestamp; a second failure aborts
                // the whole apply before anything mutates.
                tracing::warn!(%err, "snapshot failed, retrying once");
                backup::create_backup(&layout.local_dir(), &layout.backups_dir())?
            }
        };
        write_backup_manifest(&archive, &plan.summary)?;
        Some(archive)
    } else {
        None
    };

    let local_dir = layout.local_dir();
    let baseline_dir = layout.baseline_dir();

    // ------------------------------------------------------------------
    // 2. Stage local writes
    // ------------------------------------------------------------------
    let mut staged = Vec::new();
    for entry in &plan.entries {
        if entry.filtered || !entry.writes_local() {
            continue;
        }
        opts.cancel.check()?;
        let dest = entry.path.to_fs_path(&local_dir);
        let target_kind = entry.upstream_kind.unwrap_or(TreeEntryKind::File);
        if on_disk_matches(&dest, target_kind, entry.upstream_hash.as_ref())? {
            continue;
        }
        let blob = upstream.read_blob(&entry.path)?;
        match target_kind {
            TreeEntryKind::File => {
                let parent = dest.parent().unwrap_or(&local_dir);
                fs::create_dir_all(parent).map_err(|source| ApplyError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
                let mut tmp = atomic::stage_file(&dest).map_err(|source| ApplyError::Io {
                    path: dest.clone(),
                    source,
                })?;
                io::Write::write_all(&mut tmp, &blob).map_err(|source| ApplyError::Io {
                    path: dest.clone(),
                    source,
                })?;
                tmp.as_file().sync_all().map_err(|source| ApplyError::Io {
                    path: dest.clone(),
                    source,
                })?;
                staged.push(Staged::File {
                    path: entry.path.clone(),
                    dest,
                    tmp,
                });
            }
            TreeEntryKind::Link => {
                staged.push(Staged::Link {
                    path: entry.path.clone(),
                    dest,
                    target: String::from_utf8_lossy(&blob).into_owned(),
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // 3. Promote: deletes (already deepest-first in plan order), then
    //    renames (already shallowest-first).
    // ------------------------------------------------------------------
    let mut files_deleted = 0;
    for entry in &plan.entries {
        if entry.filtered || !entry.deletes_local() {
            continue;
        }
        opts.cancel.check()?;
        let dest = entry.path.to_fs_path(&local_dir);
        match fs::remove_file(&dest) {
            Ok(()) => {
                files_deleted += 1;
                tracing::debug!(path = %entry.path, "removed local file");
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ApplyError::Io { path: dest, source }),
        }
        prune_empty_dirs(&dest, &local_dir);
    }

    let mut files_written = 0;
    for item in staged {
        opts.cancel.check()?;
        match item {
            Staged::File { path, dest, tmp } => {
                tmp.persist(&dest).map_err(|err| ApplyError::Io {
                    path: dest.clone(),
                    source: err.error,
                })?;
                if let Some(parent) = dest.parent() {
                    atomic::fsync_dir(parent).map_err(|source| ApplyError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                files_written += 1;
                tracing::debug!(path = %path, "wrote local file");
            }
            Staged::Link { path, dest, target } => {
                atomic::symlink_atomic(&dest, &target).map_err(|source| ApplyError::Io {
                    path: dest.clone(),
                    source,
                })?;
                files_written += 1;
                tracing::debug!(path = %path, "wrote local symlink");
            }
        }
    }

    // ------------------------------------------------------------------
    // 4. Mirror the baseline
    // ------------------------------------------------------------------
    for entry in &plan.entries {
        if entry.filtered {
            continue;
        }
        opts.cancel.check()?;
        let dest = entry.path.to_fs_path(&baseline_dir);
        match (&entry.upstream_hash, &entry.baseline_hash) {
            // Tracked upstream: baseline converges to the upstream blob.
            (Some(upstream_hash), _) => {
                let kind = entry.upstream_kind.unwrap_or(TreeEntryKind::File);
                if on_disk_matches(&dest, kind, Some(upstream_hash))? {
                    continue;
                }
                let blob = upstream.read_blob(&entry.path)?;
                let result = match kind {
                    TreeEntryKind::File => write_atomic(&dest, &blob),
                    TreeEntryKind::Link => {
                        atomic::symlink_atomic(&dest, &String::from_utf8_lossy(&blob))
                    }
                };
                result.map_err(|source| ApplyError::Io { path: dest, source })?;
            }
            // Dropped upstream: baseline forgets the path.
            (None, Some(_)) => {
                match fs::remove_file(&dest) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => return Err(ApplyError::Io { path: dest, source }),
                }
                prune_empty_dirs(&dest, &baseline_dir);
            }
            // Untracked local file: no baseline involvement.
            (None, None) => {}
        }
    }

    // ------------------------------------------------------------------
    // 5. Meta last
    // ------------------------------------------------------------------
    let report = layout.baseline_tree().index()?;
    if let Some(first) = report.errors.first() {
        return Err(ApplyError::Io {
            path: first.path.clone(),
            source: io::Error::other(first.message.clone()),
        });
    }
    let baseline_digest = report.index.digest();
    meta.record_update(baseline_digest.clone());
    meta.store(&layout.meta_path())?;

    tracing::info!(
        written = files_written,
        deleted = files_deleted,
        conflicts = plan.summary.n_conflict,
        "apply complete"
    );
    Ok(ApplyOutcome {
        summary: plan.summary,
        files_written,
        files_deleted,
        backup_path,
        baseline_digest,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// True if the on-disk entry at `dest` already has `kind` and `hash`.
fn on_disk_matches(
    dest: &Path,
    kind: TreeEntryKind,
    hash: Option<&BlobHash>,
) -> Result<bool, ApplyError> {
    let Some(expected) = hash else {
        return Ok(false);
    };
    let io_err = |source: io::Error| ApplyError::Io {
        path: dest.to_path_buf(),
        source,
    };
    let metadata = match fs::symlink_metadata(dest) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(source) => return Err(io_err(source)),
    };
    let (actual_kind, actual_hash) = if metadata.file_type().is_symlink() {
        let target = fs::read_link(dest).map_err(io_err)?;
        (
            TreeEntryKind::Link,
            BlobHash::of_bytes(target.to_string_lossy().as_bytes()),
        )
    } else if metadata.is_file() {
        let mut file = fs::File::open(dest).map_err(io_err)?;
        (
            TreeEntryKind::File,
            BlobHash::of_reader(&mut file).map_err(io_err)?,
        )
    } else {
        return Ok(false);
    };
    Ok(actual_kind == kind && actual_hash == *expected)
}

/// Remove now-empty ancestor directories of `dest`, stopping at `root`.
fn prune_empty_dirs(dest: &Path, root: &Path) {
    let mut current = dest.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // Fails (and stops) as soon as a directory is non-empty.
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Record the plan summary next to the backup archive.
fn write_backup_manifest(archive: &Path, summary: &PlanSummary) -> Result<(), ApplyError> {
    let manifest_path = archive.with_extension("manifest.json");
    let manifest = BackupManifest {
        archive,
        created_at: chrono::Utc::now(),
        plan: summary,
    };
    let bytes = serde_json::to_vec_pretty(&manifest).map_err(|err| ApplyError::Io {
        path: manifest_path.clone(),
        source: io::Error::other(err),
    })?;
    write_atomic(&manifest_path, &bytes).map_err(|source| ApplyError::Io {
        path: manifest_path,
        source,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::plan::ConflictPolicy;
    use crate::merge::planner::{PlanOptions, plan as make_plan};
    use crate::model::tree::{DirTree, MemTree};

    fn tp(s: &str) -> TreePath {
        TreePath::new(s).unwrap()
    }

    fn write_file(root: &Path, rel: &str, content: &str) {
        let full = root.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    /// Build a ready project: baseline + local from `pairs`, meta recorded.
    fn seeded_project(dir: &Path, pairs: &[(&str, &str)]) -> (ProjectLayout, ProjectMeta) {
        let layout = ProjectLayout::new(dir);
        for (rel, content) in pairs {
            write_file(&layout.baseline_dir(), rel, content);
            write_file(&layout.local_dir(), rel, content);
        }
        fs::create_dir_all(layout.baseline_dir()).unwrap();
        fs::create_dir_all(layout.local_dir()).unwrap();
        let digest = DirTree::new(layout.baseline_dir())
            .index()
            .unwrap()
            .index
            .digest();
        let meta = ProjectMeta::for_install(digest);
        meta.store(&layout.meta_path()).unwrap();
        (layout, meta)
    }

    fn upstream_of(pairs: &[(&str, &str)]) -> MemTree {
        let mut tree = MemTree::new();
        for (rel, content) in pairs {
            tree.insert(tp(rel), *content);
        }
        tree
    }

    fn plan_for(
        upstream: &MemTree,
        layout: &ProjectLayout,
        opts: &PlanOptions,
    ) -> crate::merge::plan::Plan {
        let u = upstream.index().unwrap().index;
        let b = DirTree::new(layout.baseline_dir()).index().unwrap().index;
        let l = DirTree::new(layout.local_dir()).index().unwrap().index;
        make_plan(&u, &b, &l, opts)
    }

    fn no_backup() -> ApplyOptions {
        ApplyOptions {
            backup: false,
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn clean_apply_writes_local_and_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("a.md", "1")]);
        let upstream = upstream_of(&[("a.md", "1"), ("b.md", "2")]);

        let plan = plan_for(&upstream, &layout, &PlanOptions::default());
        assert_eq!(plan.summary.n_apply, 1);
        let outcome = apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();

        assert_eq!(outcome.files_written, 1);
        assert_eq!(
            fs::read_to_string(layout.local_dir().join("b.md")).unwrap(),
            "2"
        );
        assert_eq!(
            fs::read_to_string(layout.baseline_dir().join("b.md")).unwrap(),
            "2"
        );
        // Baseline fidelity: stored digest matches the on-disk baseline.
        let reloaded = ProjectMeta::load(&layout.meta_path()).unwrap();
        let on_disk = DirTree::new(layout.baseline_dir())
            .index()
            .unwrap()
            .index
            .digest();
        assert_eq!(reloaded.baseline_digest, on_disk);
    }

    #[test]
    fn preserve_local_leaves_edit_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("a.md", "1")]);
        write_file(&layout.local_dir(), "a.md", "1-edited");
        let upstream = upstream_of(&[("a.md", "1")]);

        let plan = plan_for(&upstream, &layout, &PlanOptions::default());
        assert_eq!(plan.summary.n_preserve, 1);
        apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();

        assert_eq!(
            fs::read_to_string(layout.local_dir().join("a.md")).unwrap(),
            "1-edited"
        );
        assert_eq!(
            fs::read_to_string(layout.baseline_dir().join("a.md")).unwrap(),
            "1"
        );
    }

    #[test]
    fn conflict_keep_local_advances_baseline_only() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("a.md", "1")]);
        write_file(&layout.local_dir(), "a.md", "1-edited");
        let upstream = upstream_of(&[("a.md", "1-new")]);

        let plan = plan_for(&upstream, &layout, &PlanOptions::default());
        assert_eq!(plan.summary.n_conflict, 1);
        apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();

        assert_eq!(
            fs::read_to_string(layout.local_dir().join("a.md")).unwrap(),
            "1-edited",
            "keep_local leaves the user's file"
        );
        assert_eq!(
            fs::read_to_string(layout.baseline_dir().join("a.md")).unwrap(),
            "1-new",
            "baseline still converges to upstream"
        );
    }

    #[test]
    fn conflict_take_upstream_overwrites_local() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("a.md", "1")]);
        write_file(&layout.local_dir(), "a.md", "1-edited");
        let upstream = upstream_of(&[("a.md", "1-new")]);

        let opts = PlanOptions {
            conflict_policy: ConflictPolicy::TakeUpstream,
            ..PlanOptions::default()
        };
        let plan = plan_for(&upstream, &layout, &opts);
        apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();

        assert_eq!(
            fs::read_to_string(layout.local_dir().join("a.md")).unwrap(),
            "1-new"
        );
    }

    #[test]
    fn cascade_delete_removes_both_trees_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("deep/nested/a.md", "1")]);
        let upstream = upstream_of(&[]);

        let plan = plan_for(&upstream, &layout, &PlanOptions::default());
        assert_eq!(plan.summary.n_delete, 1);
        let outcome = apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();

        assert_eq!(outcome.files_deleted, 1);
        assert!(!layout.local_dir().join("deep/nested/a.md").exists());
        assert!(!layout.local_dir().join("deep").exists(), "empty dirs pruned");
        assert!(!layout.baseline_dir().join("deep").exists());
        assert!(layout.local_dir().exists(), "tree root survives");
    }

    #[test]
    fn manual_conflicts_refuse_to_apply() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("a.md", "1")]);
        write_file(&layout.local_dir(), "a.md", "mine");
        let upstream = upstream_of(&[("a.md", "theirs")]);

        let opts = PlanOptions {
            conflict_policy: ConflictPolicy::Abort,
            ..PlanOptions::default()
        };
        let plan = plan_for(&upstream, &layout, &opts);
        let err = apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap_err();
        assert!(matches!(err, ApplyError::ManualConflicts { count: 1 }));
        // Nothing moved.
        assert_eq!(
            fs::read_to_string(layout.local_dir().join("a.md")).unwrap(),
            "mine"
        );
    }

    #[test]
    fn apply_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("a.md", "1")]);
        let upstream = upstream_of(&[("a.md", "2"), ("b.md", "3")]);

        let plan = plan_for(&upstream, &layout, &PlanOptions::default());
        apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();

        // Re-planning after apply yields a no-op plan.
        let second = plan_for(&upstream, &layout, &PlanOptions::default());
        assert!(second.is_noop(), "post-apply plan must be empty: {second:?}");

        // Re-applying the original plan writes nothing.
        let outcome = apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();
        assert_eq!(outcome.files_written, 0);
        assert_eq!(outcome.files_deleted, 0);
    }

    #[test]
    fn backup_is_taken_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("a.md", "original")]);
        let upstream = upstream_of(&[("a.md", "updated")]);

        let plan = plan_for(&upstream, &layout, &PlanOptions::default());
        let outcome = apply(
            &plan,
            &upstream,
            &layout,
            &mut meta,
            &ApplyOptions::default(),
        )
        .unwrap();

        let archive = outcome.backup_path.expect("backup must be recorded");
        assert!(archive.exists());
        let manifest = archive.with_extension("manifest.json");
        assert!(manifest.exists());

        // The archive holds the pre-apply content.
        let restored = dir.path().join("restored");
        crate::backup::extract_backup(&archive, &restored).unwrap();
        assert_eq!(
            fs::read_to_string(restored.join("a.md")).unwrap(),
            "original"
        );
    }

    #[test]
    fn canceled_token_halts_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("a.md", "1")]);
        let upstream = upstream_of(&[("a.md", "2")]);

        let plan = plan_for(&upstream, &layout, &PlanOptions::default());
        let cancel = CancelToken::new();
        cancel.cancel();
        let opts = ApplyOptions {
            backup: false,
            cancel,
        };
        let err = apply(&plan, &upstream, &layout, &mut meta, &opts).unwrap_err();
        assert!(matches!(err, ApplyError::Canceled));
        assert_eq!(
            fs::read_to_string(layout.local_dir().join("a.md")).unwrap(),
            "1",
            "nothing promoted after cancellation"
        );
    }

    #[test]
    fn filtered_entries_are_untouched_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) =
            seeded_project(dir.path(), &[("commands/a.md", "1"), ("agents/b.md", "1")]);
        let upstream = upstream_of(&[("commands/a.md", "2"), ("agents/b.md", "2")]);

        let opts = PlanOptions {
            path_filter: vec![glob::Pattern::new("commands/**").unwrap()],
            ..PlanOptions::default()
        };
        let plan = plan_for(&upstream, &layout, &opts);
        apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();

        assert_eq!(
            fs::read_to_string(layout.local_dir().join("commands/a.md")).unwrap(),
            "2"
        );
        assert_eq!(
            fs::read_to_string(layout.local_dir().join("agents/b.md")).unwrap(),
            "1"
        );
        assert_eq!(
            fs::read_to_string(layout.baseline_dir().join("agents/b.md")).unwrap(),
            "1",
            "filtered baseline entry stays at the old blob"
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_blobs_promote_as_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[]);
        let mut upstream = MemTree::new();
        upstream.insert(tp("settings.json"), "{}");
        upstream.insert_link(tp("current.json"), "settings.json");

        let plan = plan_for(&upstream, &layout, &PlanOptions::default());
        apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();

        let link = layout.local_dir().join("current.json");
        assert_eq!(
            fs::read_link(&link).unwrap().to_string_lossy(),
            "settings.json"
        );
        let baseline_link = layout.baseline_dir().join("current.json");
        assert_eq!(
            fs::read_link(&baseline_link).unwrap().to_string_lossy(),
            "settings.json"
        );
    }

    /// Crash between promote and meta: meta still names the old baseline;
    /// the next plan repairs it without further file changes.
    #[test]
    fn stale_meta_recovers_on_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, mut meta) = seeded_project(dir.path(), &[("a.md", "1")]);
        let upstream = upstream_of(&[("a.md", "1"), ("b.md", "2")]);

        // Simulate the crash: promote everything but skip the meta rewrite
        // by mutating the trees directly.
        write_file(&layout.local_dir(), "b.md", "2");
        write_file(&layout.baseline_dir(), "b.md", "2");

        // Project now assesses as corrupted (digest mismatch)…
        let state = crate::project::assess(&layout).unwrap();
        assert!(matches!(state, crate::project::ProjectState::Corrupted { .. }));

        // …and re-running the full apply heals it: hashes already match, so
        // no file is rewritten, and meta converges.
        let plan = plan_for(&upstream, &layout, &PlanOptions::default());
        let outcome = apply(&plan, &upstream, &layout, &mut meta, &no_backup()).unwrap();
        assert_eq!(outcome.files_written, 0);
        assert!(crate::project::assess(&layout).unwrap().is_ready());
    }
}
