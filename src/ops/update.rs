//! `config update` — the primary path: plan and apply upstream changes.
//!
//! ```text
//! sweep stale temps
//!   → acquire project lock (shared for --dry-run, exclusive otherwise)
//!   → assess project (digest mismatch self-heals; other corruption refuses)
//!   → index upstream / baseline / local
//!   → plan
//!   → dry-run: return the plan
//!   → abort policy + conflicts: refuse (exit 4)
//!   → apply (backup → stage → promote → mirror → meta)
//!   → tag a recovery point, when configured
//! ```

use crate::error::WmError;
use crate::fsio::atomic::sweep_temps;
use crate::merge::apply::{ApplyOptions, ApplyOutcome, CancelToken, apply};
use crate::merge::plan::{ConflictPolicy, Plan};
use crate::merge::planner::{PlanOptions, plan as compute_plan};
use crate::meta::ProjectMeta;
use crate::model::tree::TreeSource;
use crate::project::{CorruptionKind, ProjectState, assess};
use crate::recovery;
use crate::upstream;

use super::OpContext;

/// CLI-facing update parameters.
#[derive(Clone, Debug, Default)]
pub struct UpdateArgs {
    /// Compute and return the plan without applying.
    pub dry_run: bool,
    /// Conflict policy override (otherwise `.wm/config.toml`, otherwise
    /// keep-local).
    pub conflict_policy: Option<ConflictPolicy>,
    /// Re-install upstream files the user deleted.
    pub restore_missing: bool,
    /// Glob allow-list for the paths to touch.
    pub filters: Vec<String>,
    /// Skip the pre-apply snapshot.
    pub no_backup: bool,
}

/// What an update produced.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// `--dry-run`: the plan that would run.
    DryRun(Plan),
    /// The plan was applied.
    Applied {
        /// What the applier did.
        outcome: ApplyOutcome,
        /// The plan that was applied.
        plan: Plan,
        /// The recovery tag created afterward, when configured.
        recovery_tag: Option<String>,
    },
}

/// Run the update operation.
///
/// # Errors
/// See the [`WmError`] exit-code table; notably `ConflictsAbort` under the
/// abort policy and `Corrupted` for non-healable inconsistencies.
pub fn run(
    ctx: &OpContext,
    args: &UpdateArgs,
    cancel: &CancelToken,
) -> Result<UpdateOutcome, WmError> {
    // Reclaim anything a crashed predecessor staged but never promoted.
    let _ = sweep_temps(&ctx.layout.local_dir());
    let _ = sweep_temps(&ctx.layout.baseline_dir());

    let lock_opts = if args.dry_run {
        ctx.config.shared_lock_options()
    } else {
        ctx.config.lock_options()
    };
    let _guard = ctx.locks.acquire(&ctx.layout.lock_path(), lock_opts)?;

    let mut meta = match assess(&ctx.layout)? {
        ProjectState::Ready { meta } => meta,
        ProjectState::Uninitialized => {
            return Err(WmError::NotInstalled {
                root: ctx.layout.root().to_path_buf(),
            });
        }
        ProjectState::Corrupted {
            kind: CorruptionKind::DigestMismatch,
            detail,
        } => {
            // The signature of an apply that died between promoting files
            // and rewriting meta. Planning against the on-disk baseline
            // converges everything, so proceed.
            tracing::warn!(%detail, "stale baseline digest; continuing to self-heal");
            ProjectMeta::load(&ctx.layout.meta_path())?
        }
        ProjectState::Corrupted { detail, .. } => {
            return Err(WmError::Corrupted { detail });
        }
    };

    let plan_opts = PlanOptions {
        conflict_policy: args
            .conflict_policy
            .unwrap_or(ctx.config.update.conflict_policy),
        restore_missing: args.restore_missing,
        path_filter: parse_filters(&args.filters)?,
    };

    let workers = ctx.config.diff.effective_workers();
    let upstream_tree = upstream::system_tree()?;
    let upstream_index = upstream_tree.index()?.index;
    let baseline_report = ctx.layout.baseline_tree().with_workers(workers).index()?;
    if let Some(first) = baseline_report.errors.first() {
        return Err(WmError::Corrupted {
            detail: format!("baseline has unreadable entries; first: {first}"),
        });
    }
    let local_report = ctx.layout.local_tree().with_workers(workers).index()?;
    for error in &local_report.errors {
        tracing::warn!(%error, "skipping unreadable local entry");
    }

    let plan = compute_plan(
        &upstream_index,
        &baseline_report.index,
        &local_report.index,
        &plan_opts,
    );
    tracing::info!(
        apply = plan.summary.n_apply,
        preserve = plan.summary.n_preserve,
        delete = plan.summary.n_delete,
        conflict = plan.summary.n_conflict,
        "plan computed"
    );

    if args.dry_run {
        return Ok(UpdateOutcome::DryRun(plan));
    }
    if plan.has_manual_conflicts() {
        return Err(WmError::ConflictsAbort {
            count: plan.summary.n_conflict,
        });
    }

    let apply_opts = ApplyOptions {
        backup: !args.no_backup && !ctx.config.backup.disabled,
        cancel: cancel.clone(),
    };
    let outcome = apply(&plan, &upstream_tree, &ctx.layout, &mut meta, &apply_opts)?;

    let recovery_tag = if ctx.config.recovery.enabled && recovery::is_initialized(&ctx.layout) {
        match recovery::create_recovery_point(&ctx.layout, "update") {
            Ok(tag) => tag,
            Err(err) => {
                // The update itself succeeded; a failed tag is a warning,
                // not a failure.
                tracing::warn!(%err, "could not create recovery point");
                None
            }
        }
    } else {
        None
    };

    Ok(UpdateOutcome::Applied {
        outcome,
        plan,
        recovery_tag,
    })
}

fn parse_filters(filters: &[String]) -> Result<Vec<glob::Pattern>, WmError> {
    filters
        .iter()
        .map(|raw| {
            glob::Pattern::new(raw).map_err(|err| {
                WmError::Config(crate::config::ConfigError {
                    path: None,
                    message: format!("invalid --filter pattern '{raw}': {err}"),
                })
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
