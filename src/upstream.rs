//! The embedded upstream tree.
//!
//! The template tree ships inside the binary via `include_dir!`. Storage is
//! keyed by a root prefix (`"system"`), so the same embedded directory can
//! carry multiple logical trees; only the system tree exists today.
//!
//! The embedded data is exposed as a [`MemTree`], the same [`TreeSource`]
//! the planner and applier consume everywhere else — upstream being
//! compiled-in rather than on disk is invisible past this module.

use include_dir::{Dir, include_dir};

use crate::model::tree::{MemTree, TreeError};
use crate::model::types::TreePath;

static TEMPLATES: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/templates");

/// The root prefix of the system template tree.
pub const SYSTEM_PREFIX: &str = "system";

/// The embedded system tree.
///
/// # Errors
/// Returns an error only if an embedded path fails validation — a build
/// problem, not a runtime condition.
pub fn system_tree() -> Result<MemTree, TreeError> {
    tree_at(SYSTEM_PREFIX)
}

/// The embedded tree under `prefix`.
///
/// An unknown prefix yields an empty tree.
///
/// # Errors
/// Returns an error only if an embedded path fails validation.
pub fn tree_at(prefix: &str) -> Result<MemTree, TreeError> {
    let mut tree = MemTree::new();
    if let Some(dir) = TEMPLATES.get_dir(prefix) {
        collect(dir, prefix, &mut tree)?;
    }
    Ok(tree)
}

fn collect(dir: &Dir<'static>, prefix: &str, out: &mut MemTree) -> Result<(), TreeError> {
    for entry in dir.entries() {
        match entry {
            include_dir::DirEntry::Dir(sub) => collect(sub, prefix, out)?,
            include_dir::DirEntry::File(file) => {
                let full = file.path().to_string_lossy().replace('\\', "/");
                let rel = full
                    .strip_prefix(&format!("{prefix}/"))
                    .unwrap_or(full.as_str());
                out.insert(TreePath::new(rel)?, file.contents().to_vec());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
