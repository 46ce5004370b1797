//! Three-way merge planning.
//!
//! [`plan`] walks the union of paths across upstream (U), baseline (B), and
//! local (L) and classifies each one. B is the reference point: U≠B means
//! upstream moved, L≠B means the user moved, and both moving to different
//! content is the only conflict. The full table:
//!
//! | U | B | L | action |
//! |---|---|---|---|
//! | absent | absent | any | keep (untracked local file) |
//! | present | absent | absent | apply |
//! | present | absent | == U | keep |
//! | present | absent | ≠ U | conflict |
//! | present | == U | absent | delete (honor removal) unless `restore_missing`, then apply |
//! | present | == U | == B | keep |
//! | present | == U | ≠ B | preserve_local |
//! | present | ≠ U | absent | apply (reintroduce) |
//! | present | ≠ U | == B | apply (fast-forward) |
//! | present | ≠ U | == U | keep (already applied) |
//! | present | ≠ U | ≠ B, ≠ U | conflict |
//! | absent | present | absent | delete (baseline only) |
//! | absent | present | == B | delete (cascade removal) |
//! | absent | present | ≠ B | conflict (removed upstream, edited locally) |
//!
//! Planning is pure: the same three indexes and options always produce the
//! same plan, entry for entry.

use std::collections::BTreeSet;

use crate::model::tree::{TreeEntry, TreeIndex};
use crate::model::types::TreePath;

use super::plan::{ConflictPolicy, ConflictResolution, Plan, PlanAction, PlanEntry};

// ---------------------------------------------------------------------------
// PlanOptions
// ---------------------------------------------------------------------------

/// Planner knobs.
#[derive(Clone, Debug, Default)]
pub struct PlanOptions {
    /// How conflicts are stamped.
    pub conflict_policy: ConflictPolicy,
    /// Re-install upstream files the user deleted (default: honor deletion).
    pub restore_missing: bool,
    /// Glob allow-list; when non-empty, paths matching no pattern are kept
    /// untouched (local *and* baseline).
    pub path_filter: Vec<glob::Pattern>,
}

impl PlanOptions {
    /// True if `path` survives the filter (or no filter is set).
    #[must_use]
    pub fn selects(&self, path: &TreePath) -> bool {
        self.path_filter.is_empty()
            || self
                .path_filter
                .iter()
                .any(|pattern| pattern.matches(path.as_str()))
    }
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

/// Compute the merge plan for one `(U, B, L)` triple.
#[must_use]
pub fn plan(
    upstream: &TreeIndex,
    baseline: &TreeIndex,
    local: &TreeIndex,
    opts: &PlanOptions,
) -> Plan {
    let mut paths: BTreeSet<&TreePath> = BTreeSet::new();
    paths.extend(upstream.paths());
    paths.extend(baseline.paths());
    paths.extend(local.paths());

    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let u = upstream.get(path);
        let b = baseline.get(path);
        let l = local.get(path);

        let action = if opts.selects(path) {
            classify(u, b, l, opts)
        } else {
            PlanAction::Keep
        };

        entries.push(PlanEntry {
            path: path.clone(),
            action,
            upstream_hash: u.map(|e| e.hash.clone()),
            upstream_kind: u.map(|e| e.kind),
            baseline_hash: b.map(|e| e.hash.clone()),
            local_hash: l.map(|e| e.hash.clone()),
            filtered: !opts.selects(path),
        });
    }

    Plan::from_entries(entries)
}

/// The decision table, one cell per call.
fn classify(
    u: Option<&TreeEntry>,
    b: Option<&TreeEntry>,
    l: Option<&TreeEntry>,
    opts: &PlanOptions,
) -> PlanAction {
    let conflict = PlanAction::Conflict {
        resolution: resolution_for(opts.conflict_policy),
    };
    match (u, b) {
        // Untracked local file: not ours to manage.
        (None, None) => PlanAction::Keep,

        // New upstream path, no baseline claim on it yet.
        (Some(u), None) => match l {
            None => PlanAction::Apply,
            Some(l) if same(l, u) => PlanAction::Keep,
            Some(_) => conflict,
        },

        // Upstream dropped a path the baseline still tracks.
        (None, Some(b)) => match l {
            None => PlanAction::Delete,
            Some(l) if same(l, b) => PlanAction::Delete,
            Some(_) => conflict,
        },

        // Tracked on both sides.
        (Some(u), Some(b)) => {
            let upstream_moved = !same(u, b);
            match l {
                None => {
                    if upstream_moved || opts.restore_missing {
                        PlanAction::Apply
                    } else {
                        PlanAction::Delete
                    }
                }
                Some(l) if same(l, b) => {
                    if upstream_moved {
                        PlanAction::Apply
                    } else {
                        PlanAction::Keep
                    }
                }
                Some(l) if same(l, u) => PlanAction::Keep,
                Some(_) => {
                    if upstream_moved {
                        conflict
                    } else {
                        PlanAction::PreserveLocal
                    }
                }
            }
        }
    }
}

const fn resolution_for(policy: ConflictPolicy) -> ConflictResolution {
    match policy {
        ConflictPolicy::KeepLocal => ConflictResolution::KeepLocal,
        ConflictPolicy::TakeUpstream => ConflictResolution::TakeUpstream,
        ConflictPolicy::Abort => ConflictResolution::Manual,
    }
}

/// Entry identity: hash and kind both count.
fn same(a: &TreeEntry, b: &TreeEntry) -> bool {
    a.hash == b.hash && a.kind == b.kind
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
