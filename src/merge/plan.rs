//! Merge plan types.
//!
//! A [`Plan`] is a pure value: an ordered list of per-path actions derived
//! from the three-way diff, plus a summary. It owns no filesystem handles
//! and serializes to JSON for dry-run output, so computing a plan and
//! printing a plan are the same code path as applying one.
//!
//! # Ordering
//!
//! Entries are ordered so application is safe without lookahead: deletes
//! first, deepest paths first (a directory can only empty out after its
//! children go); then everything else, shallowest paths first (parents exist
//! before children). Ties break lexicographically, which also makes plan
//! output deterministic.

use serde::{Deserialize, Serialize};

use crate::model::tree::TreeEntryKind;
use crate::model::types::{BlobHash, TreePath};

// ---------------------------------------------------------------------------
// ConflictPolicy / ConflictResolution
// ---------------------------------------------------------------------------

/// How the planner stamps conflicting paths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Leave the user's file in place; the baseline still advances (default).
    #[default]
    KeepLocal,
    /// Overwrite the user's file with the upstream blob.
    TakeUpstream,
    /// Refuse to apply any plan that contains conflicts.
    Abort,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepLocal => write!(f, "keep_local"),
            Self::TakeUpstream => write!(f, "take_upstream"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// The resolution recorded on a conflict entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local blob; advance the baseline.
    KeepLocal,
    /// Write the upstream blob over the local one.
    TakeUpstream,
    /// Unresolved — the plan cannot be applied as-is.
    Manual,
}

// ---------------------------------------------------------------------------
// PlanAction / PlanEntry
// ---------------------------------------------------------------------------

/// What application does at one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
    /// No action required.
    Keep,
    /// Write the upstream blob into local and baseline.
    Apply,
    /// Leave the local edit; baseline is already at upstream.
    PreserveLocal,
    /// Remove the path from local and baseline.
    Delete,
    /// Upstream and local both diverged from baseline, incompatibly.
    Conflict {
        /// The policy-assigned resolution.
        resolution: ConflictResolution,
    },
}

/// One path's planned action, with the three hashes that justified it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// The path.
    pub path: TreePath,
    /// The action.
    #[serde(flatten)]
    pub action: PlanAction,
    /// Hash in the upstream tree, when present there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_hash: Option<BlobHash>,
    /// Upstream entry kind, when present there (drives file-vs-symlink
    /// staging at apply time).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_kind: Option<TreeEntryKind>,
    /// Hash in the baseline tree, when present there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_hash: Option<BlobHash>,
    /// Hash in the local tree, when present there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<BlobHash>,
    /// True if a path filter excluded this path: observed but untouched,
    /// including its baseline entry.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub filtered: bool,
}

impl PlanEntry {
    /// True if application writes the upstream blob into the local tree.
    #[must_use]
    pub const fn writes_local(&self) -> bool {
        matches!(
            self.action,
            PlanAction::Apply
                | PlanAction::Conflict {
                    resolution: ConflictResolution::TakeUpstream,
                }
        )
    }

    /// True if application removes the path from the local tree.
    #[must_use]
    pub const fn deletes_local(&self) -> bool {
        matches!(self.action, PlanAction::Delete)
    }
}

// ---------------------------------------------------------------------------
// PlanSummary / Plan
// ---------------------------------------------------------------------------

/// Aggregate counts over a plan's entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Paths written from upstream.
    pub n_apply: usize,
    /// Local edits preserved.
    pub n_preserve: usize,
    /// Paths removed.
    pub n_delete: usize,
    /// Conflicting paths (any resolution).
    pub n_conflict: usize,
}

/// An ordered, serializable merge plan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Entries in application order.
    pub entries: Vec<PlanEntry>,
    /// Aggregate counts.
    pub summary: PlanSummary,
}

impl Plan {
    /// Build a plan: order the entries and compute the summary.
    #[must_use]
    pub fn from_entries(mut entries: Vec<PlanEntry>) -> Self {
        entries.sort_by(|a, b| {
            let a_delete = a.deletes_local();
            let b_delete = b.deletes_local();
            // Deletes before everything else.
            b_delete
                .cmp(&a_delete)
                .then_with(|| {
                    if a_delete {
                        // Among deletes: deepest first.
                        b.path.depth().cmp(&a.path.depth())
                    } else {
                        // Among writes/keeps: shallowest first.
                        a.path.depth().cmp(&b.path.depth())
                    }
                })
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut summary = PlanSummary::default();
        for entry in &entries {
            match entry.action {
                PlanAction::Keep => {}
                PlanAction::Apply => summary.n_apply += 1,
                PlanAction::PreserveLocal => summary.n_preserve += 1,
                PlanAction::Delete => summary.n_delete += 1,
                PlanAction::Conflict { .. } => summary.n_conflict += 1,
            }
        }
        Self { entries, summary }
    }

    /// True if applying the plan would change nothing on disk.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.summary.n_apply == 0 && self.summary.n_delete == 0 && self.summary.n_conflict == 0
    }

    /// True if any entry is a conflict.
    #[must_use]
    pub const fn has_conflicts(&self) -> bool {
        self.summary.n_conflict > 0
    }

    /// True if any conflict entry is unresolved.
    #[must_use]
    pub fn has_manual_conflicts(&self) -> bool {
        self.entries.iter().any(|entry| {
            matches!(
                entry.action,
                PlanAction::Conflict {
                    resolution: ConflictResolution::Manual,
                }
            )
        })
    }

    /// Iterate only the entries a reader cares about (everything but keeps).
    pub fn actionable(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|entry| !matches!(entry.action, PlanAction::Keep))
    }

    /// Dry-run output: the whole plan as pretty JSON.
    ///
    /// # Errors
    /// Returns a serialization error (unrepresentable values only).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tp(s: &str) -> TreePath {
        TreePath::new(s).unwrap()
    }

    fn entry(path: &str, action: PlanAction) -> PlanEntry {
        PlanEntry {
            path: tp(path),
            action,
            upstream_hash: None,
            upstream_kind: None,
            baseline_hash: None,
            local_hash: None,
            filtered: false,
        }
    }

    #[test]
    fn deletes_precede_writes() {
        let plan = Plan::from_entries(vec![
            entry("a/new.md", PlanAction::Apply),
            entry("b/old.md", PlanAction::Delete),
            entry("c.md", PlanAction::Apply),
        ]);
        let actions: Vec<_> = plan.entries.iter().map(|e| e.deletes_local()).collect();
        assert_eq!(actions, vec![true, false, false]);
    }

    #[test]
    fn deletes_are_deepest_first() {
        let plan = Plan::from_entries(vec![
            entry("dir/sub.md", PlanAction::Delete),
            entry("dir/deep/leaf.md", PlanAction::Delete),
            entry("top.md", PlanAction::Delete),
        ]);
        let paths: Vec<_> = plan.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["dir/deep/leaf.md", "dir/sub.md", "top.md"]);
    }

    #[test]
    fn writes_are_shallowest_first() {
        let plan = Plan::from_entries(vec![
            entry("a/b/c.md", PlanAction::Apply),
            entry("a/b.md", PlanAction::Apply),
            entry("root.md", PlanAction::Apply),
        ]);
        let paths: Vec<_> = plan.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["root.md", "a/b.md", "a/b/c.md"]);
    }

    #[test]
    fn no_write_is_descendant_of_a_later_delete() {
        let plan = Plan::from_entries(vec![
            entry("dir/file.md", PlanAction::Apply),
            entry("dir", PlanAction::Delete),
            entry("dir/nested/x.md", PlanAction::Delete),
            entry("other/y.md", PlanAction::Apply),
        ]);
        for (i, write) in plan.entries.iter().enumerate() {
            if !write.writes_local() {
                continue;
            }
            for later in &plan.entries[i + 1..] {
                if later.deletes_local() {
                    assert!(
                        !write.path.is_under(&later.path),
                        "write '{}' precedes delete of its ancestor '{}'",
                        write.path,
                        later.path
                    );
                }
            }
        }
    }

    #[test]
    fn summary_counts_by_action() {
        let plan = Plan::from_entries(vec![
            entry("a", PlanAction::Apply),
            entry("b", PlanAction::Apply),
            entry("c", PlanAction::PreserveLocal),
            entry("d", PlanAction::Delete),
            entry(
                "e",
                PlanAction::Conflict {
                    resolution: ConflictResolution::KeepLocal,
                },
            ),
            entry("f", PlanAction::Keep),
        ]);
        assert_eq!(plan.summary.n_apply, 2);
        assert_eq!(plan.summary.n_preserve, 1);
        assert_eq!(plan.summary.n_delete, 1);
        assert_eq!(plan.summary.n_conflict, 1);
    }

    #[test]
    fn noop_detection() {
        let noop = Plan::from_entries(vec![
            entry("a", PlanAction::Keep),
            entry("b", PlanAction::PreserveLocal),
        ]);
        assert!(noop.is_noop());
        let busy = Plan::from_entries(vec![entry("a", PlanAction::Apply)]);
        assert!(!busy.is_noop());
    }

    #[test]
    fn manual_conflict_detection() {
        let plan = Plan::from_entries(vec![entry(
            "x",
            PlanAction::Conflict {
                resolution: ConflictResolution::Manual,
            },
        )]);
        assert!(plan.has_conflicts());
        assert!(plan.has_manual_conflicts());

        let resolved = Plan::from_entries(vec![entry(
            "x",
            PlanAction::Conflict {
                resolution: ConflictResolution::KeepLocal,
            },
        )]);
        assert!(resolved.has_conflicts());
        assert!(!resolved.has_manual_conflicts());
    }

    #[test]
    fn json_roundtrip() {
        let plan = Plan::from_entries(vec![
            entry("a.md", PlanAction::Apply),
            entry(
                "b.md",
                PlanAction::Conflict {
                    resolution: ConflictResolution::TakeUpstream,
                },
            ),
        ]);
        let json = plan.to_json_pretty().unwrap();
        assert!(json.contains("\"action\": \"apply\""));
        assert!(json.contains("\"resolution\": \"take_upstream\""));
        let decoded: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, plan);
    }

    #[test]
    fn filtered_flag_omitted_when_false() {
        let plan = Plan::from_entries(vec![entry("a.md", PlanAction::Keep)]);
        let json = plan.to_json_pretty().unwrap();
        assert!(!json.contains("filtered"));
    }

    #[test]
    fn actionable_skips_keeps() {
        let plan = Plan::from_entries(vec![
            entry("a", PlanAction::Keep),
            entry("b", PlanAction::Apply),
        ]);
        let paths: Vec<_> = plan.actionable().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["b"]);
    }
}
