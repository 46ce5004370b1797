//! `backups list` / `backups prune` — manual snapshot retention.
//!
//! The engine never deletes a backup on its own; these are the tools for
//! the human who decided it is time.

use std::path::PathBuf;

use crate::backup;
use crate::error::WmError;

use super::OpContext;

/// All backup archives, oldest first.
///
/// # Errors
/// Fails only if the backups directory exists but cannot be read.
pub fn list(ctx: &OpContext) -> Result<Vec<PathBuf>, WmError> {
    backup::list_backups(&ctx.layout.backups_dir()).map_err(|source| WmError::Io {
        path: ctx.layout.backups_dir(),
        source,
    })
}

/// Delete all but the newest `keep` archives (and their manifests).
///
/// Returns the removed archive paths.
///
/// # Errors
/// Lock or filesystem failures.
pub fn prune(ctx: &OpContext, keep: usize) -> Result<Vec<PathBuf>, WmError> {
    let _guard = ctx
        .locks
        .acquire(&ctx.layout.lock_path(), ctx.config.lock_options())?;

    let archives = list(ctx)?;
    let cut = archives.len().saturating_sub(keep);
    let mut removed = Vec::with_capacity(cut);
    for archive in &archives[..cut] {
        std::fs::remove_file(archive).map_err(|source| WmError::Io {
            path: archive.clone(),
            source,
        })?;
        // Manifests ride along with their archive.
        let manifest = archive.with_extension("manifest.json");
        if manifest.exists() {
            let _ = std::fs::remove_file(&manifest);
        }
        tracing::info!(archive = %archive.display(), "pruned backup");
        removed.push(archive.clone());
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(dir: &tempfile::TempDir, stamps: &[&str]) -> OpContext {
        let ctx = OpContext::new(dir.path()).unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("f.md"), "x").unwrap();
        for stamp in stamps {
            backup::create_backup_stamped(&src, &ctx.layout.backups_dir(), stamp).unwrap();
        }
        ctx
    }

    #[test]
    fn list_is_chronological() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = seeded(
            &dir,
            &["2024-06-02_00-00-00", "2024-06-01_00-00-00", "2024-06-03_00-00-00"],
        );
        let listed = list(&ctx).unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].ends_with("2024-06-01_00-00-00.zip"));
        assert!(listed[2].ends_with("2024-06-03_00-00-00.zip"));
    }

    #[test]
    fn prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = seeded(
            &dir,
            &["2024-06-01_00-00-00", "2024-06-02_00-00-00", "2024-06-03_00-00-00"],
        );
        let removed = prune(&ctx, 1).unwrap();
        assert_eq!(removed.len(), 2);
        let remaining = list(&ctx).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].ends_with("2024-06-03_00-00-00.zip"));
    }

    #[test]
    fn prune_with_enough_budget_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = seeded(&dir, &["2024-06-01_00-00-00"]);
        assert!(prune(&ctx, 5).unwrap().is_empty());
        assert_eq!(list(&ctx).unwrap().len(), 1);
    }
}
