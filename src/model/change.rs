//! Change records and two-tree diffing.
//!
//! [`diff`] compares two [`TreeIndex`]es and produces an ordered list of
//! [`Change`] records. The comparison is pure — both indexes are already
//! hashed — so diffing is cheap and deterministic: output order is
//! lexicographic by path, inherited from the index ordering.

use serde::{Deserialize, Serialize};

use super::tree::TreeIndex;
use super::types::{BlobHash, TreePath};

// ---------------------------------------------------------------------------
// Change
// ---------------------------------------------------------------------------

/// How a path differs between an old and a new tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Present in the new tree only.
    New,
    /// Present in both, content differs.
    Modified,
    /// Present in the old tree only.
    Deleted,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// One path's difference between two trees.
///
/// For `Modified`, `old_hash != new_hash` always holds — unchanged paths
/// produce no record at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// The path that changed.
    pub path: TreePath,
    /// The kind of change.
    pub kind: ChangeKind,
    /// Hash in the old tree (absent for `New`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_hash: Option<BlobHash>,
    /// Hash in the new tree (absent for `Deleted`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<BlobHash>,
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

/// Compare `old` and `new`, returning changes sorted lexicographically by
/// path.
///
/// A path whose kind changes (file ↔ symlink) but whose blob bytes happen to
/// match still counts as modified: kind is part of identity in the canonical
/// digest, so it must be part of identity here too. To keep the `Change`
/// record honest (`old_hash != new_hash` for `Modified`), kind flips with
/// identical bytes are reported as delete + re-add.
#[must_use]
pub fn diff(old: &TreeIndex, new: &TreeIndex) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut new_iter = new.iter().peekable();

    for old_entry in old {
        // Emit any new-only paths that sort before this old path.
        while let Some(new_entry) = new_iter.peek() {
            if new_entry.path < old_entry.path {
                changes.push(Change {
                    path: new_entry.path.clone(),
                    kind: ChangeKind::New,
                    old_hash: None,
                    new_hash: Some(new_entry.hash.clone()),
                });
                new_iter.next();
            } else {
                break;
            }
        }

        match new_iter.peek() {
            Some(new_entry) if new_entry.path == old_entry.path => {
                if new_entry.hash != old_entry.hash {
                    changes.push(Change {
                        path: old_entry.path.clone(),
                        kind: ChangeKind::Modified,
                        old_hash: Some(old_entry.hash.clone()),
                        new_hash: Some(new_entry.hash.clone()),
                    });
                } else if new_entry.kind != old_entry.kind {
                    changes.push(Change {
                        path: old_entry.path.clone(),
                        kind: ChangeKind::Deleted,
                        old_hash: Some(old_entry.hash.clone()),
                        new_hash: None,
                    });
                    changes.push(Change {
                        path: old_entry.path.clone(),
                        kind: ChangeKind::New,
                        old_hash: None,
                        new_hash: Some(new_entry.hash.clone()),
                    });
                }
                new_iter.next();
            }
            _ => {
                changes.push(Change {
                    path: old_entry.path.clone(),
                    kind: ChangeKind::Deleted,
                    old_hash: Some(old_entry.hash.clone()),
                    new_hash: None,
                });
            }
        }
    }

    for new_entry in new_iter {
        changes.push(Change {
            path: new_entry.path.clone(),
            kind: ChangeKind::New,
            old_hash: None,
            new_hash: Some(new_entry.hash.clone()),
        });
    }

    changes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tree::{MemTree, TreeSource};
    use crate::model::types::TreePath;

    fn tp(s: &str) -> TreePath {
        TreePath::new(s).unwrap()
    }

    fn index_of(pairs: &[(&str, &str)]) -> TreeIndex {
        let mut tree = MemTree::new();
        for (path, content) in pairs {
            tree.insert(tp(path), *content);
        }
        tree.index().unwrap().index
    }

    #[test]
    fn identical_trees_diff_empty() {
        let a = index_of(&[("x.md", "1"), ("y/z.md", "2")]);
        assert!(diff(&a, &a.clone()).is_empty());
    }

    #[test]
    fn detects_new() {
        let old = index_of(&[("a.md", "1")]);
        let new = index_of(&[("a.md", "1"), ("b.md", "2")]);
        let changes = diff(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::New);
        assert_eq!(changes[0].path, tp("b.md"));
        assert!(changes[0].old_hash.is_none());
        assert!(changes[0].new_hash.is_some());
    }

    #[test]
    fn detects_modified() {
        let old = index_of(&[("a.md", "1")]);
        let new = index_of(&[("a.md", "2")]);
        let changes = diff(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert_ne!(changes[0].old_hash, changes[0].new_hash);
    }

    #[test]
    fn detects_deleted() {
        let old = index_of(&[("a.md", "1"), ("b.md", "2")]);
        let new = index_of(&[("a.md", "1")]);
        let changes = diff(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Deleted);
        assert_eq!(changes[0].path, tp("b.md"));
        assert!(changes[0].new_hash.is_none());
    }

    #[test]
    fn mixed_changes_sorted_by_path() {
        let old = index_of(&[("b.md", "1"), ("d.md", "2"), ("f.md", "3")]);
        let new = index_of(&[("a.md", "0"), ("b.md", "1"), ("d.md", "x"), ("g.md", "4")]);
        let changes = diff(&old, &new);
        let described: Vec<_> = changes
            .iter()
            .map(|c| (c.path.as_str(), c.kind))
            .collect();
        assert_eq!(
            described,
            vec![
                ("a.md", ChangeKind::New),
                ("d.md", ChangeKind::Modified),
                ("f.md", ChangeKind::Deleted),
                ("g.md", ChangeKind::New),
            ]
        );
    }

    #[test]
    fn kind_flip_same_bytes_reports_delete_then_add() {
        let mut old_tree = MemTree::new();
        old_tree.insert(tp("f"), "target");
        let mut new_tree = MemTree::new();
        new_tree.insert_link(tp("f"), "target");
        let changes = diff(
            &old_tree.index().unwrap().index,
            &new_tree.index().unwrap().index,
        );
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Deleted);
        assert_eq!(changes[1].kind, ChangeKind::New);
    }

    #[test]
    fn empty_to_populated_is_all_new() {
        let old = TreeIndex::new();
        let new = index_of(&[("a", "1"), ("b", "2")]);
        let changes = diff(&old, &new);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::New));
    }

    #[test]
    fn populated_to_empty_is_all_deleted() {
        let old = index_of(&[("a", "1"), ("b", "2")]);
        let changes = diff(&old, &TreeIndex::new());
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Deleted));
    }

    #[test]
    fn modified_always_has_distinct_hashes() {
        let old = index_of(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let new = index_of(&[("a", "9"), ("b", "2"), ("c", "8")]);
        for change in diff(&old, &new) {
            if change.kind == ChangeKind::Modified {
                assert_ne!(change.old_hash, change.new_hash);
            }
        }
    }
}
