//! `config status` — read-only view of both divergences.
//!
//! Takes the project lock in shared mode, then reports two change lists:
//! baseline → upstream (what an update would pull) and baseline → local
//! (what the user has changed).

use serde::Serialize;

use crate::error::WmError;
use crate::model::change::{Change, diff};
use crate::model::tree::TreeSource;
use crate::project::{ProjectState, assess};
use crate::upstream;

use super::OpContext;

/// The status report, directly serializable for `--json`.
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    /// `uninitialized`, `ready`, or `corrupted: …`.
    pub state: String,
    /// Changes an update would bring in (baseline → upstream).
    pub upstream_changes: Vec<Change>,
    /// The user's local divergence (baseline → local).
    pub local_changes: Vec<Change>,
}

/// Run the status operation.
///
/// Never mutates; an uninitialized or corrupted project still reports (with
/// empty change lists for the trees that cannot be compared).
///
/// # Errors
/// Lock or tree enumeration failures only.
pub fn run(ctx: &OpContext) -> Result<StatusReport, WmError> {
    let _guard = ctx
        .locks
        .acquire(&ctx.layout.lock_path(), ctx.config.shared_lock_options())?;

    let state = assess(&ctx.layout)?;
    let state_text = state.to_string();

    if matches!(state, ProjectState::Uninitialized) {
        return Ok(StatusReport {
            state: state_text,
            upstream_changes: Vec::new(),
            local_changes: Vec::new(),
        });
    }

    let workers = ctx.config.diff.effective_workers();
    let upstream_index = upstream::system_tree()?.index()?.index;
    let baseline_index = ctx
        .layout
        .baseline_tree()
        .with_workers(workers)
        .index()?
        .index;
    let local_index = ctx.layout.local_tree().with_workers(workers).index()?.index;

    Ok(StatusReport {
        state: state_text,
        upstream_changes: diff(&baseline_index, &upstream_index),
        local_changes: diff(&baseline_index, &local_index),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
