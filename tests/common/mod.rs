//! Shared helpers for integration tests.
//!
//! All tests run against temp directories — no side effects outside them.
//! Each test gets its own project via `fresh_project()` or
//! `installed_project()`.
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use claude_wm::meta::ProjectMeta;
use claude_wm::model::tree::TreeSource;
use claude_wm::ops::OpContext;

/// A temp project directory with a context built for it.
pub fn fresh_project() -> (TempDir, OpContext) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let ctx = OpContext::new(dir.path()).expect("context must build");
    (dir, ctx)
}

/// A temp project with the embedded templates installed.
pub fn installed_project() -> (TempDir, OpContext) {
    let (dir, ctx) = fresh_project();
    claude_wm::ops::install::run(&ctx).expect("install must succeed");
    (dir, ctx)
}

/// Write `content` at `root/rel`, creating parents.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let full = root.join(rel);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

/// Read `root/rel` as a string.
pub fn read_file(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel))
        .unwrap_or_else(|err| panic!("read {rel}: {err}"))
}

/// Rewrite the project's recorded baseline digest to match the baseline
/// directory's current content. Used after tests mutate the baseline by
/// hand to fabricate upstream/baseline divergence.
pub fn resync_meta(ctx: &OpContext) {
    let digest = ctx
        .layout
        .baseline_tree()
        .index()
        .unwrap()
        .index
        .digest();
    let mut meta = ProjectMeta::load(&ctx.layout.meta_path()).unwrap();
    meta.record_update(digest);
    meta.store(&ctx.layout.meta_path()).unwrap();
}
