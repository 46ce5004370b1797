//! `recover` — restore corrupted state files from recovery history.
//!
//! With no paths given, sweeps the local tree and `meta.json` through the
//! corruption detector and feeds everything corrupt into auto-recovery.
//! Explicit paths (relative to the project root) skip the sweep.

use std::path::Path;

use crate::error::WmError;
use crate::fsio::corrupt;
use crate::recovery::{self, RecoverReport, RecoveryStrategy};

use super::OpContext;

/// CLI-facing recover parameters.
#[derive(Clone, Debug, Default)]
pub struct RecoverArgs {
    /// Root-relative paths to restore; empty means "scan for corruption".
    pub paths: Vec<String>,
    /// Restore strategy.
    pub strategy: RecoveryStrategy,
}

/// What a recover run found and did.
#[derive(Debug)]
pub struct RecoverOutcome {
    /// The paths that were considered (corrupt, or explicitly requested).
    pub candidates: Vec<String>,
    /// Per-path restore results; empty when nothing was corrupt.
    pub report: RecoverReport,
}

/// Run the recover operation.
///
/// `confirm` is called under the conservative and interactive strategies
/// with `(path, commit)` before each restore.
///
/// # Errors
/// Fails when the recovery repository is missing (and restores were
/// needed), or on lock/scan failures.
pub fn run(
    ctx: &OpContext,
    args: &RecoverArgs,
    confirm: &mut dyn FnMut(&str, &str) -> bool,
) -> Result<RecoverOutcome, WmError> {
    let _guard = ctx
        .locks
        .acquire(&ctx.layout.lock_path(), ctx.config.lock_options())?;

    let candidates = if args.paths.is_empty() {
        scan_for_corruption(ctx)?
    } else {
        args.paths.clone()
    };

    if candidates.is_empty() {
        tracing::info!("no corrupted files found");
        return Ok(RecoverOutcome {
            candidates,
            report: RecoverReport::new(),
        });
    }

    let report = recovery::auto_recover(&ctx.layout, &candidates, args.strategy, confirm)?;
    Ok(RecoverOutcome { candidates, report })
}

/// Detector sweep over the local tree plus `meta.json`, yielding
/// root-relative paths.
fn scan_for_corruption(ctx: &OpContext) -> Result<Vec<String>, WmError> {
    let root = ctx.layout.root();
    let mut corrupted = Vec::new();

    let reports = corrupt::scan_tree(&ctx.layout.local_dir()).map_err(|source| WmError::Io {
        path: ctx.layout.local_dir(),
        source,
    })?;
    for report in reports {
        tracing::warn!(%report, "corrupt state file");
        if let Some(rel) = root_relative(root, &report.path) {
            corrupted.push(rel);
        }
    }

    let meta_path = ctx.layout.meta_path();
    if meta_path.exists()
        && let Ok(Some(report)) = corrupt::detect(&meta_path)
    {
        tracing::warn!(%report, "corrupt metadata");
        if let Some(rel) = root_relative(root, &meta_path) {
            corrupted.push(rel);
        }
    }

    Ok(corrupted)
}

fn root_relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in rel.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::{RestoreResult, create_recovery_point, git_available, init_repo};

    fn yes(_: &str, _: &str) -> bool {
        true
    }

    #[test]
    fn clean_project_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = OpContext::new(dir.path()).unwrap();
        crate::ops::install::run(&ctx).unwrap();

        let outcome = run(&ctx, &RecoverArgs::default(), &mut yes).unwrap();
        assert!(outcome.candidates.is_empty());
        assert!(outcome.report.is_empty());
    }

    #[test]
    fn scan_finds_corrupt_state_and_restores() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let ctx = OpContext::new(dir.path()).unwrap();
        crate::ops::install::run(&ctx).unwrap();
        init_repo(&ctx.layout).unwrap();
        create_recovery_point(&ctx.layout, "baseline").unwrap().unwrap();

        // Corrupt a live JSON state file.
        std::fs::write(ctx.layout.local_dir().join("settings.json"), "{\"broken\": ").unwrap();

        let outcome = run(&ctx, &RecoverArgs::default(), &mut yes).unwrap();
        assert_eq!(outcome.candidates, vec![".claude/settings.json".to_owned()]);
        assert!(matches!(outcome.report[0].1, RestoreResult::Restored { .. }));
        assert!(
            corrupt::detect(&ctx.layout.local_dir().join("settings.json"))
                .unwrap()
                .is_none(),
            "restored file must be clean"
        );
    }

    #[test]
    fn explicit_paths_skip_scan() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let ctx = OpContext::new(dir.path()).unwrap();
        crate::ops::install::run(&ctx).unwrap();
        init_repo(&ctx.layout).unwrap();
        create_recovery_point(&ctx.layout, "baseline").unwrap().unwrap();

        std::fs::write(ctx.layout.local_dir().join("settings.json"), "junk").unwrap();
        let args = RecoverArgs {
            paths: vec![".claude/settings.json".to_owned()],
            strategy: RecoveryStrategy::Automatic,
        };
        let outcome = run(&ctx, &args, &mut yes).unwrap();
        assert!(matches!(outcome.report[0].1, RestoreResult::Restored { .. }));
    }
}
