//! Git-backed recovery points.
//!
//! Recovery points are commits in a private repository at
//! `.wm/recovery.git` whose work tree is the project root. Only `.claude/`
//! and `.wm/baseline/` are ever staged, so the user's own version control
//! never sees engine traffic. Each point is tagged
//! `recovery/<timestamp>-<reason>`.
//!
//! All git access shells out to the `git` binary; errors carry the command
//! and captured stderr.
//!
//! Restores are verified: a restored JSON file is re-run through the
//! corruption detector, and auto-recovery walks further back in history
//! until it finds a version that passes (except under the `aggressive`
//! strategy, which accepts the newest version it can get).

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use crate::fsio::atomic::write_atomic;
use crate::fsio::corrupt;
use crate::project::ProjectLayout;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// How eagerly restores are performed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Restore the newest clean version of each file, no questions asked.
    #[default]
    Automatic,
    /// Like automatic, but confirm each restore.
    Conservative,
    /// Accept lossy restores: if no clean version exists, take the newest
    /// version that exists at all.
    Aggressive,
    /// Prompt for every candidate.
    Interactive,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Conservative => write!(f, "conservative"),
            Self::Aggressive => write!(f, "aggressive"),
            Self::Interactive => write!(f, "interactive"),
        }
    }
}

impl FromStr for RecoveryStrategy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic" => Ok(Self::Automatic),
            "conservative" => Ok(Self::Conservative),
            "aggressive" => Ok(Self::Aggressive),
            "interactive" => Ok(Self::Interactive),
            other => Err(format!(
                "unknown strategy '{other}' (expected automatic, conservative, aggressive, or interactive)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from recovery-point operations.
#[derive(Debug)]
pub enum RecoveryError {
    /// A git command failed.
    Git {
        /// The command that ran.
        command: String,
        /// Captured stderr.
        stderr: String,
        /// Exit code, if any.
        exit_code: Option<i32>,
    },
    /// Spawning git or touching the filesystem failed.
    Io(io::Error),
    /// No recovery repository exists for this project.
    NotInitialized {
        /// Where the repository was expected.
        git_dir: PathBuf,
    },
    /// No restorable version of a path was found in history.
    NoCleanVersion {
        /// The path that could not be restored.
        path: String,
    },
    /// A restored file failed its post-restore integrity check.
    RestoredFileCorrupt {
        /// The path that was restored.
        path: String,
        /// The commit it was restored from.
        commit: String,
    },
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git {
                command,
                stderr,
                exit_code,
            } => {
                write!(f, "`{command}` failed")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit {code})")?;
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::Io(err) => write!(f, "I/O error during recovery: {err}"),
            Self::NotInitialized { git_dir } => {
                write!(
                    f,
                    "no recovery repository at '{}'.\n  To fix: run `claude-wm doctor` to initialize one, or restore from a ZIP backup instead.",
                    git_dir.display()
                )
            }
            Self::NoCleanVersion { path } => {
                write!(
                    f,
                    "no restorable version of '{path}' found in recovery history"
                )
            }
            Self::RestoredFileCorrupt { path, commit } => {
                write!(
                    f,
                    "restored '{path}' from {commit} but it failed the integrity check"
                )
            }
        }
    }
}

impl std::error::Error for RecoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::Io(err) = self {
            Some(err)
        } else {
            None
        }
    }
}

impl From<io::Error> for RecoveryError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

// ---------------------------------------------------------------------------
// Git plumbing
// ---------------------------------------------------------------------------

/// Run git against the private recovery repository.
///
/// Commands run from the project root with a root-relative git dir and work
/// tree, so pathspecs like `.claude` always resolve against the project.
fn git(layout: &ProjectLayout, args: &[&str]) -> Result<String, RecoveryError> {
    let out = git_command(layout, args)?;
    if out.status.success() {
        Ok(String::from_utf8_lossy(&out.stdout).trim_end().to_owned())
    } else {
        Err(git_failure(args, &out))
    }
}

/// Like [`git`] but returns raw stdout bytes (blob content).
fn git_bytes(layout: &ProjectLayout, args: &[&str]) -> Result<Vec<u8>, RecoveryError> {
    let out = git_command(layout, args)?;
    if out.status.success() {
        Ok(out.stdout)
    } else {
        Err(git_failure(args, &out))
    }
}

fn git_command(layout: &ProjectLayout, args: &[&str]) -> io::Result<std::process::Output> {
    Command::new("git")
        .arg("--git-dir=.wm/recovery.git")
        .arg("--work-tree=.")
        .args(args)
        .current_dir(layout.root())
        .output()
}

fn git_failure(args: &[&str], out: &std::process::Output) -> RecoveryError {
    RecoveryError::Git {
        command: format!("git {}", args.join(" ")),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
        exit_code: out.status.code(),
    }
}

/// True if git itself is runnable on this machine.
#[must_use]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

/// True if the project has a recovery repository.
#[must_use]
pub fn is_initialized(layout: &ProjectLayout) -> bool {
    layout.recovery_git_dir().is_dir()
}

/// Create the private recovery repository. Safe to call repeatedly.
///
/// # Errors
/// Returns an error if git fails.
pub fn init_repo(layout: &ProjectLayout) -> Result<(), RecoveryError> {
    if is_initialized(layout) {
        return Ok(());
    }
    std::fs::create_dir_all(layout.wm_dir())?;
    git(layout, &["init", "--quiet"])?;
    // Commits must succeed without a global identity (CI, fresh machines).
    git(layout, &["config", "user.email", "recovery@claude-wm.local"])?;
    git(layout, &["config", "user.name", "claude-wm recovery"])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Recovery points
// ---------------------------------------------------------------------------

/// Commit the current `.claude/` and `.wm/baseline/` state and tag it.
///
/// Returns the tag name, or `Ok(None)` when no recovery repository exists
/// (recovery is opt-in by initializing one).
///
/// # Errors
/// Returns an error if any git step fails.
pub fn create_recovery_point(
    layout: &ProjectLayout,
    reason: &str,
) -> Result<Option<String>, RecoveryError> {
    if !is_initialized(layout) {
        return Ok(None);
    }

    let mut staged_any = false;
    for dir in [layout.local_dir(), layout.baseline_dir()] {
        if dir.is_dir() {
            let rel = dir
                .strip_prefix(layout.root())
                .unwrap_or(&dir)
                .to_string_lossy()
                .into_owned();
            git(layout, &["add", "--all", "--", &rel])?;
            staged_any = true;
        }
    }
    if !staged_any {
        return Ok(None);
    }

    git(
        layout,
        &[
            "commit",
            "--quiet",
            "--allow-empty",
            "-m",
            &format!("recovery point: {reason}"),
        ],
    )?;

    let tag = format!(
        "recovery/{}-{}",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"),
        sanitize_reason(reason)
    );
    git(layout, &["tag", &tag])?;
    tracing::info!(%tag, "created recovery point");
    Ok(Some(tag))
}

/// All `recovery/*` tags, oldest first.
///
/// # Errors
/// Returns [`RecoveryError::NotInitialized`] without a repository.
pub fn list_recovery_points(layout: &ProjectLayout) -> Result<Vec<String>, RecoveryError> {
    if !is_initialized(layout) {
        return Err(RecoveryError::NotInitialized {
            git_dir: layout.recovery_git_dir(),
        });
    }
    let out = git(layout, &["tag", "-l", "recovery/*"])?;
    Ok(out.lines().map(str::to_owned).collect())
}

/// Read one file's blob at a revision. `rel` is relative to the project
/// root (e.g. `.claude/settings.json`).
///
/// # Errors
/// Returns an error if the revision or path does not exist.
pub fn read_blob_at(
    layout: &ProjectLayout,
    revision: &str,
    rel: &str,
) -> Result<Vec<u8>, RecoveryError> {
    git_bytes(layout, &["show", &format!("{revision}:{rel}")])
}

/// Restore one file to its content at `revision`, atomically, then verify.
///
/// # Errors
/// Fails if the blob cannot be read, written, or (for JSON files) fails the
/// post-restore integrity check.
pub fn restore_path(
    layout: &ProjectLayout,
    revision: &str,
    rel: &str,
) -> Result<(), RecoveryError> {
    let blob = read_blob_at(layout, revision, rel)?;
    if is_json(rel) && !corrupt::is_clean(&blob) {
        return Err(RecoveryError::RestoredFileCorrupt {
            path: rel.to_owned(),
            commit: revision.to_owned(),
        });
    }
    let dest = layout.root().join(rel);
    write_atomic(&dest, &blob)?;
    tracing::info!(path = rel, %revision, "restored file");
    Ok(())
}

// ---------------------------------------------------------------------------
// Auto-recovery
// ---------------------------------------------------------------------------

/// One path's auto-recovery result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestoreResult {
    /// Restored from the named commit.
    Restored {
        /// The commit the content came from.
        commit: String,
    },
    /// Skipped (declined by the confirmation callback).
    Declined,
    /// No usable version found.
    Failed {
        /// Why.
        reason: String,
    },
}

/// The outcome of [`auto_recover`], per path in input order.
pub type RecoverReport = Vec<(String, RestoreResult)>;

/// Walk history backward and restore each corrupted path from the most
/// recent commit whose version passes the integrity check.
///
/// `confirm` is consulted per restore under the `conservative` and
/// `interactive` strategies; the other strategies never call it.
///
/// # Errors
/// Fails if the recovery repository is missing or history cannot be read.
/// Per-path failures are reported in the result, not as errors.
pub fn auto_recover(
    layout: &ProjectLayout,
    corrupted: &[String],
    strategy: RecoveryStrategy,
    confirm: &mut dyn FnMut(&str, &str) -> bool,
) -> Result<RecoverReport, RecoveryError> {
    if !is_initialized(layout) {
        return Err(RecoveryError::NotInitialized {
            git_dir: layout.recovery_git_dir(),
        });
    }

    let history = git(layout, &["rev-list", "HEAD"])?;
    let commits: Vec<&str> = history.lines().collect();

    let mut report = RecoverReport::new();
    for rel in corrupted {
        let result = recover_one(layout, rel, &commits, strategy, confirm);
        report.push((rel.clone(), result));
    }
    Ok(report)
}

fn recover_one(
    layout: &ProjectLayout,
    rel: &str,
    commits: &[&str],
    strategy: RecoveryStrategy,
    confirm: &mut dyn FnMut(&str, &str) -> bool,
) -> RestoreResult {
    let mut newest_existing: Option<(&str, Vec<u8>)> = None;

    for commit in commits {
        let Ok(blob) = read_blob_at(layout, commit, rel) else {
            continue;
        };
        if newest_existing.is_none() {
            newest_existing = Some((commit, blob.clone()));
        }
        if is_json(rel) && !corrupt::is_clean(&blob) {
            continue;
        }
        let wants = match strategy {
            RecoveryStrategy::Automatic | RecoveryStrategy::Aggressive => true,
            RecoveryStrategy::Conservative | RecoveryStrategy::Interactive => {
                confirm(rel, commit)
            }
        };
        if !wants {
            return RestoreResult::Declined;
        }
        return match write_atomic(&layout.root().join(rel), &blob) {
            Ok(()) => RestoreResult::Restored {
                commit: (*commit).to_owned(),
            },
            Err(err) => RestoreResult::Failed {
                reason: err.to_string(),
            },
        };
    }

    // No clean version anywhere. Aggressive mode takes what it can get.
    if strategy == RecoveryStrategy::Aggressive {
        if let Some((commit, blob)) = newest_existing {
            return match write_atomic(&layout.root().join(rel), &blob) {
                Ok(()) => {
                    tracing::warn!(path = rel, %commit, "lossy restore: content fails integrity check");
                    RestoreResult::Restored {
                        commit: commit.to_owned(),
                    }
                }
                Err(err) => RestoreResult::Failed {
                    reason: err.to_string(),
                },
            };
        }
    }
    RestoreResult::Failed {
        reason: RecoveryError::NoCleanVersion {
            path: rel.to_owned(),
        }
        .to_string(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_json(rel: &str) -> bool {
    rel.rsplit('.').next() == Some("json")
}

/// Tags allow a restricted charset; flatten the reason to fit.
fn sanitize_reason(reason: &str) -> String {
    let cleaned: String = reason
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "unspecified".to_owned()
    } else {
        trimmed.chars().take(40).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
