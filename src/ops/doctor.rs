//! `doctor` — environment and project diagnosis.
//!
//! Checks the things that make other commands fail mysteriously: git
//! availability, project consistency, a stale project lock, backup-dir
//! writability. When git is available and the project has a `.wm/`
//! directory, doctor also initializes the recovery repository — it is the
//! opt-in switch for recovery points. Safe to run multiple times.

use serde::Serialize;

use crate::error::WmError;
use crate::fsio::lock::LockRecord;
use crate::project::{ProjectState, assess};
use crate::recovery;
use crate::upstream;

use super::OpContext;

/// One diagnostic line.
#[derive(Clone, Debug, Serialize)]
pub struct DoctorCheck {
    /// What was checked.
    pub name: String,
    /// Whether it passed.
    pub ok: bool,
    /// Human detail.
    pub detail: String,
}

/// Run all checks. Never fails hard: each problem is a failed check.
///
/// # Errors
/// Infallible in practice; the signature leaves room for future checks
/// that cannot report through a [`DoctorCheck`].
pub fn run(ctx: &OpContext) -> Result<Vec<DoctorCheck>, WmError> {
    let mut checks = Vec::new();
    let mut push = |name: &str, ok: bool, detail: String| {
        checks.push(DoctorCheck {
            name: name.to_owned(),
            ok,
            detail,
        });
    };

    // Embedded templates.
    match upstream::system_tree() {
        Ok(tree) => push(
            "embedded templates",
            !tree.is_empty(),
            format!("{} template file(s) embedded", tree.len()),
        ),
        Err(err) => push("embedded templates", false, err.to_string()),
    }

    // Git availability.
    let git_ok = recovery::git_available();
    push(
        "git",
        git_ok,
        if git_ok {
            "git is on PATH".to_owned()
        } else {
            "git not found; recovery points unavailable".to_owned()
        },
    );

    // Project state.
    match assess(&ctx.layout) {
        Ok(state) => {
            let ok = !matches!(state, ProjectState::Corrupted { .. });
            push("project state", ok, state.to_string());
        }
        Err(err) => push("project state", false, err.to_string()),
    }

    // Stale lock sidecar.
    let lock_path = ctx.layout.lock_path();
    if lock_path.exists() {
        let detail = std::fs::read(&lock_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockRecord>(&bytes).ok())
            .map_or_else(
                || "lock sidecar present but unreadable".to_owned(),
                |record| {
                    format!(
                        "lock sidecar held by pid {} on {} since {}",
                        record.pid, record.hostname, record.acquired_at
                    )
                },
            );
        push("project lock", true, detail);
    } else {
        push("project lock", true, "no lock held".to_owned());
    }

    // Backups directory writability.
    let backups_dir = ctx.layout.backups_dir();
    let writable = std::fs::create_dir_all(&backups_dir)
        .and_then(|()| tempfile::tempfile_in(&backups_dir).map(drop))
        .is_ok();
    push(
        "backups dir",
        writable,
        if writable {
            format!("{} is writable", backups_dir.display())
        } else {
            format!("{} is not writable", backups_dir.display())
        },
    );

    // Recovery repository: initialize when possible.
    if git_ok && ctx.layout.wm_dir().is_dir() {
        if recovery::is_initialized(&ctx.layout) {
            push("recovery repo", true, "initialized".to_owned());
        } else {
            match recovery::init_repo(&ctx.layout) {
                Ok(()) => push("recovery repo", true, "initialized now".to_owned()),
                Err(err) => push("recovery repo", false, err.to_string()),
            }
        }
    } else {
        push(
            "recovery repo",
            true,
            "skipped (no git or no installation)".to_owned(),
        );
    }

    Ok(checks)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_reports_all_checks() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = OpContext::new(dir.path()).unwrap();
        let checks = run(&ctx).unwrap();
        let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"embedded templates"));
        assert!(names.contains(&"git"));
        assert!(names.contains(&"project state"));
        assert!(names.contains(&"project lock"));
        assert!(names.contains(&"backups dir"));
        assert!(names.contains(&"recovery repo"));
    }

    #[test]
    fn doctor_initializes_recovery_repo_for_installed_project() {
        if !recovery::git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let ctx = OpContext::new(dir.path()).unwrap();
        crate::ops::install::run(&ctx).unwrap();
        assert!(!recovery::is_initialized(&ctx.layout));
        run(&ctx).unwrap();
        assert!(recovery::is_initialized(&ctx.layout));
        // Second run is a no-op.
        run(&ctx).unwrap();
    }

    #[test]
    fn doctor_flags_templates_present() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = OpContext::new(dir.path()).unwrap();
        let checks = run(&ctx).unwrap();
        let templates = checks
            .iter()
            .find(|c| c.name == "embedded templates")
            .unwrap();
        assert!(templates.ok);
    }
}
