//! `config install` — first-time installation of the embedded templates.
//!
//! Writes the system tree into `.wm/baseline/` and `.claude/`, then records
//! `meta.json`. Fails if the project is already installed. Local files that
//! already exist are left alone — the baseline still records the upstream
//! blob, so the first `update` classifies the difference as a local edit
//! instead of silently clobbering it.

use std::io;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::WmError;
use crate::fsio::atomic::{symlink_atomic, write_atomic};
use crate::model::tree::{TreeEntryKind, TreeSource};
use crate::model::types::BlobHash;
use crate::recovery;
use crate::upstream;

use super::OpContext;

/// What an install produced.
#[derive(Clone, Debug, Serialize)]
pub struct InstallOutcome {
    /// Files written into the baseline.
    pub baseline_files: usize,
    /// Files written into the local tree (pre-existing ones are skipped).
    pub local_files: usize,
    /// The recorded baseline digest.
    pub baseline_digest: BlobHash,
    /// The recovery point tagged after install, when recovery is set up.
    pub recovery_tag: Option<String>,
}

/// Run the installation.
///
/// # Errors
/// [`WmError::AlreadyInstalled`] when `meta.json` exists; otherwise lock,
/// tree, or I/O errors.
pub fn run(ctx: &OpContext) -> Result<InstallOutcome, WmError> {
    let _guard = ctx
        .locks
        .acquire(&ctx.layout.lock_path(), ctx.config.lock_options())?;

    if ctx.layout.meta_path().exists() {
        return Err(WmError::AlreadyInstalled {
            root: ctx.layout.root().to_path_buf(),
        });
    }

    let upstream = upstream::system_tree()?;
    let report = upstream.index()?;

    let baseline_dir = ctx.layout.baseline_dir();
    let local_dir = ctx.layout.local_dir();
    let io_err = |path: PathBuf| move |source: io::Error| WmError::Io { path, source };

    let mut baseline_files = 0;
    let mut local_files = 0;
    for entry in report.index.iter() {
        let blob = upstream.read_blob(&entry.path)?;

        let baseline_dest = entry.path.to_fs_path(&baseline_dir);
        write_blob(&baseline_dest, entry.kind, &blob).map_err(io_err(baseline_dest.clone()))?;
        baseline_files += 1;

        let local_dest = entry.path.to_fs_path(&local_dir);
        if std::fs::symlink_metadata(&local_dest).is_err() {
            write_blob(&local_dest, entry.kind, &blob).map_err(io_err(local_dest.clone()))?;
            local_files += 1;
        } else {
            tracing::info!(path = %entry.path, "keeping pre-existing local file");
        }
    }
    // An empty template tree still installs: the directories must exist for
    // later operations to walk.
    std::fs::create_dir_all(&baseline_dir).map_err(io_err(baseline_dir.clone()))?;
    std::fs::create_dir_all(&local_dir).map_err(io_err(local_dir))?;

    let baseline_digest = ctx.layout.baseline_tree().index()?.index.digest();
    let meta = crate::meta::ProjectMeta::for_install(baseline_digest.clone());
    meta.store(&ctx.layout.meta_path())?;

    let recovery_tag = if ctx.config.recovery.enabled && recovery::is_initialized(&ctx.layout) {
        recovery::create_recovery_point(&ctx.layout, "install")?
    } else {
        None
    };

    tracing::info!(baseline_files, local_files, "install complete");
    Ok(InstallOutcome {
        baseline_files,
        local_files,
        baseline_digest,
        recovery_tag,
    })
}

fn write_blob(dest: &std::path::Path, kind: TreeEntryKind, blob: &[u8]) -> io::Result<()> {
    match kind {
        TreeEntryKind::File => write_atomic(dest, blob),
        TreeEntryKind::Link => symlink_atomic(dest, &String::from_utf8_lossy(blob)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ProjectState, assess};

    fn ctx_in(dir: &tempfile::TempDir) -> OpContext {
        OpContext::new(dir.path()).unwrap()
    }

    #[test]
    fn install_creates_both_trees_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        let outcome = run(&ctx).unwrap();

        assert!(outcome.baseline_files > 0);
        assert_eq!(outcome.baseline_files, outcome.local_files);
        assert!(ctx.layout.meta_path().exists());
        assert!(ctx.layout.local_dir().join("settings.json").exists());
        assert!(ctx.layout.baseline_dir().join("settings.json").exists());
        assert!(assess(&ctx.layout).unwrap().is_ready());
    }

    #[test]
    fn second_install_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        run(&ctx).unwrap();
        let err = run(&ctx).unwrap_err();
        assert!(matches!(err, WmError::AlreadyInstalled { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn install_preserves_existing_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        std::fs::create_dir_all(ctx.layout.local_dir()).unwrap();
        std::fs::write(ctx.layout.local_dir().join("settings.json"), "user's").unwrap();

        let outcome = run(&ctx).unwrap();
        assert_eq!(
            std::fs::read_to_string(ctx.layout.local_dir().join("settings.json")).unwrap(),
            "user's"
        );
        assert!(outcome.local_files < outcome.baseline_files);
        // The project is still consistent; the divergence is a local edit.
        match assess(&ctx.layout).unwrap() {
            ProjectState::Ready { .. } => {}
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn install_digest_matches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(&dir);
        let outcome = run(&ctx).unwrap();
        let on_disk = ctx.layout.baseline_tree().index().unwrap().index.digest();
        assert_eq!(outcome.baseline_digest, on_disk);
    }
}
