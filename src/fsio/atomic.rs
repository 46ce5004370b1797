//! Atomic file writes.
//!
//! Every state mutation in the engine funnels through the temp-then-rename
//! discipline implemented here:
//!
//! 1. Create a temp file next to the destination (same directory, so the
//!    rename never crosses a filesystem).
//! 2. Write all bytes; `fsync` the file; close it.
//! 3. `rename` over the destination — atomic replacement.
//! 4. `fsync` the containing directory so the new entry survives a crash.
//!
//! A reader that opens the destination sees either the old complete content
//! or the new complete content, never a prefix.
//!
//! Staged temp names carry the `.wm-stage.` prefix and `.tmp` suffix so an
//! interrupted run's leftovers can be swept on the next invocation.

use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

/// Prefix for staged temp files.
pub const STAGE_PREFIX: &str = ".wm-stage.";

/// Suffix for staged temp files.
pub const STAGE_SUFFIX: &str = ".tmp";

/// Write `bytes` to `path` atomically.
///
/// Creates parent directories as needed.
///
/// # Errors
/// Returns the underlying I/O error if any step fails. On failure the
/// destination is untouched; a leftover temp file may remain for
/// [`sweep_temps`] to reclaim.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = parent_of(path)?;
    fs::create_dir_all(dir)?;

    let mut tmp = stage_file(path)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;

    fsync_dir(dir)
}

/// Create a symlink at `path` pointing at `target`, atomically.
///
/// The link is created under a staged temp name in the same directory and
/// renamed into place, so an existing entry at `path` is replaced atomically.
///
/// # Errors
/// Returns the underlying I/O error if any step fails.
pub fn symlink_atomic(path: &Path, target: &str) -> io::Result<()> {
    let dir = parent_of(path)?;
    fs::create_dir_all(dir)?;

    let tmp_path = dir.join(stage_name(path));
    // A previous crash may have left a stale entry at the staged name.
    let _ = fs::remove_file(&tmp_path);
    make_symlink(target, &tmp_path)?;
    fs::rename(&tmp_path, path)?;

    fsync_dir(dir)
}

/// Remove leftover staged temp files under `root`, recursively.
///
/// Only names produced by this module ([`STAGE_PREFIX`]…[`STAGE_SUFFIX`])
/// are touched. Returns how many files were removed.
///
/// # Errors
/// Returns an error if `root` cannot be walked; individual removals that
/// fail are skipped.
pub fn sweep_temps(root: &Path) -> io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for item in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = item.map_err(io::Error::other)?;
        let name = entry.file_name().to_string_lossy();
        if name.starts_with(STAGE_PREFIX)
            && name.ends_with(STAGE_SUFFIX)
            && !entry.file_type().is_dir()
            && fs::remove_file(entry.path()).is_ok()
        {
            removed += 1;
        }
    }
    Ok(removed)
}

/// `fsync` a directory so a freshly renamed entry is durable.
///
/// On platforms where directories cannot be opened for sync (Windows), this
/// is a no-op.
///
/// # Errors
/// Returns the underlying I/O error on Unix when the directory cannot be
/// opened or synced.
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        fs::File::open(dir)?.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

/// Open a staged [`tempfile::NamedTempFile`] in `path`'s directory.
///
/// # Errors
/// Returns an error if the temp file cannot be created.
pub fn stage_file(path: &Path) -> io::Result<tempfile::NamedTempFile> {
    let dir = parent_of(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(&format!("{STAGE_PREFIX}{name}."))
        .suffix(STAGE_SUFFIX)
        .tempfile_in(dir)
}

fn stage_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{STAGE_PREFIX}{name}.{:08x}{STAGE_SUFFIX}", rand::random::<u32>())
}

fn parent_of(path: &Path) -> io::Result<&Path> {
    path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no parent directory: {}", path.display()),
        )
    })
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
