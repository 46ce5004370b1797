//! Timestamped ZIP snapshots of the local tree.
//!
//! Before any plan mutates `.claude/`, its current state is archived to
//! `.wm/backups/YYYY-MM-DD_HH-MM-SS.zip` (collisions get `-1`, `-2`, …).
//! The archive itself is written with the same temp-then-rename discipline
//! as every other state file, so a crashed backup never leaves a
//! half-written ZIP under a final name.
//!
//! Entries store relative POSIX paths, deflate-compressed; symlinks are
//! stored as symlink entries (unix mode bits), with the link target as the
//! entry body. Restore is [`extract_backup`], used by tests and recovery.

use std::fmt;
use std::fs;
use std::io::{self, Read as _, Write as _};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::fsio::atomic;
use crate::model::tree::{DirTree, TreeEntryKind, TreeSource};

/// Unix mode marking a zip entry as a symlink.
const S_IFLNK: u32 = 0o120_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors creating or extracting a backup archive.
#[derive(Debug)]
pub enum BackupError {
    /// Filesystem failure.
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// The zip library refused an operation.
    Zip {
        /// The archive involved.
        path: PathBuf,
        /// The underlying error.
        source: zip::result::ZipError,
    },
    /// The source tree had unreadable entries; a partial snapshot would be
    /// worse than none.
    UnreadableSource {
        /// Description of the first failure.
        detail: String,
    },
    /// An archive entry would escape the extraction root.
    UnsafeEntry {
        /// The offending entry name.
        name: String,
    },
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "backup I/O error at '{}': {source}", path.display())
            }
            Self::Zip { path, source } => {
                write!(f, "zip error in '{}': {source}", path.display())
            }
            Self::UnreadableSource { detail } => {
                write!(
                    f,
                    "refusing to snapshot a partially readable tree: {detail}\n  To fix: resolve the unreadable entry, then retry."
                )
            }
            Self::UnsafeEntry { name } => {
                write!(f, "archive entry '{name}' escapes the extraction root")
            }
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Zip { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Snapshot `src_dir` into a timestamped ZIP under `backups_dir`.
///
/// Returns the final archive path. A missing or empty `src_dir` produces an
/// empty archive — "nothing installed yet" is still a restorable state.
///
/// # Errors
/// Fails if the source tree has unreadable entries or on any I/O/zip error.
pub fn create_backup(src_dir: &Path, backups_dir: &Path) -> Result<PathBuf, BackupError> {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    create_backup_stamped(src_dir, backups_dir, &stamp)
}

/// [`create_backup`] with an explicit timestamp label (tests use this to
/// exercise collision handling).
///
/// # Errors
/// As [`create_backup`].
pub fn create_backup_stamped(
    src_dir: &Path,
    backups_dir: &Path,
    stamp: &str,
) -> Result<PathBuf, BackupError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| BackupError::Io { path, source }
    };
    fs::create_dir_all(backups_dir).map_err(io_err(backups_dir))?;

    let final_path = free_backup_name(backups_dir, stamp);

    // Enumerate first: an unreadable source aborts before any bytes land.
    let tree = DirTree::new(src_dir);
    let report = tree.index().map_err(|err| BackupError::UnreadableSource {
        detail: err.to_string(),
    })?;
    if let Some(first) = report.errors.first() {
        return Err(BackupError::UnreadableSource {
            detail: first.to_string(),
        });
    }

    let tmp = atomic::stage_file(&final_path).map_err(io_err(backups_dir))?;
    let zip_file = tmp.as_file().try_clone().map_err(io_err(&final_path))?;
    let mut writer = ZipWriter::new(zip_file);
    let zip_err = |source: zip::result::ZipError| BackupError::Zip {
        path: final_path.clone(),
        source,
    };

    let file_opts = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for entry in report.index.iter() {
        match entry.kind {
            TreeEntryKind::File => {
                writer
                    .start_file(entry.path.as_str(), file_opts)
                    .map_err(zip_err)?;
                let fs_path = entry.path.to_fs_path(src_dir);
                let mut src = fs::File::open(&fs_path).map_err(io_err(&fs_path))?;
                io::copy(&mut src, &mut writer).map_err(io_err(&fs_path))?;
            }
            TreeEntryKind::Link => {
                let target = tree
                    .read_blob(&entry.path)
                    .map_err(|err| BackupError::UnreadableSource {
                        detail: err.to_string(),
                    })?;
                writer
                    .add_symlink(
                        entry.path.as_str(),
                        String::from_utf8_lossy(&target).into_owned(),
                        file_opts,
                    )
                    .map_err(zip_err)?;
            }
        }
    }

    let file = writer.finish().map_err(zip_err)?;
    file.sync_all().map_err(io_err(&final_path))?;
    drop(file);
    tmp.persist(&final_path).map_err(|err| BackupError::Io {
        path: final_path.clone(),
        source: err.error,
    })?;
    atomic::fsync_dir(backups_dir).map_err(io_err(backups_dir))?;

    tracing::info!(archive = %final_path.display(), entries = report.index.len(), "created backup");
    Ok(final_path)
}

/// First unused `<stamp>.zip`, `<stamp>-1.zip`, `<stamp>-2.zip`, … name.
fn free_backup_name(backups_dir: &Path, stamp: &str) -> PathBuf {
    let candidate = backups_dir.join(format!("{stamp}.zip"));
    if !candidate.exists() {
        return candidate;
    }
    for n in 1.. {
        let candidate = backups_dir.join(format!("{stamp}-{n}.zip"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("some suffix is always free")
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// All `.zip` archives under `backups_dir`, sorted by name (which is sorted
/// by time, given the naming scheme).
///
/// # Errors
/// Fails only if the directory exists but cannot be read.
pub fn list_backups(backups_dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !backups_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut archives: Vec<PathBuf> = fs::read_dir(backups_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("zip"))
        .collect();
    archives.sort();
    Ok(archives)
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Unpack `archive` into `dest_dir` (created if missing).
///
/// # Errors
/// Fails on I/O or zip errors, or if an entry name would escape `dest_dir`.
pub fn extract_backup(archive: &Path, dest_dir: &Path) -> Result<(), BackupError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| BackupError::Io { path, source }
    };
    let zip_err = |source: zip::result::ZipError| BackupError::Zip {
        path: archive.to_path_buf(),
        source,
    };

    let file = fs::File::open(archive).map_err(io_err(archive))?;
    let mut reader = ZipArchive::new(file).map_err(zip_err)?;
    fs::create_dir_all(dest_dir).map_err(io_err(dest_dir))?;

    for i in 0..reader.len() {
        let mut entry = reader.by_index(i).map_err(zip_err)?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(BackupError::UnsafeEntry {
                name: entry.name().to_owned(),
            });
        };
        let dest = dest_dir.join(&rel);

        if entry.is_dir() {
            fs::create_dir_all(&dest).map_err(io_err(&dest))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let is_symlink = entry
            .unix_mode()
            .is_some_and(|mode| mode & 0o170_000 == S_IFLNK);
        if is_symlink {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(io_err(&dest))?;
            atomic::symlink_atomic(&dest, &target).map_err(io_err(&dest))?;
        } else {
            let mut out = fs::File::create(&dest).map_err(io_err(&dest))?;
            io::copy(&mut entry, &mut out).map_err(io_err(&dest))?;
            out.flush().map_err(io_err(&dest))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::change::diff;

    fn write_file(root: &Path, rel: &str, content: &str) {
        let full = root.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    #[test]
    fn backup_name_uses_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write_file(&src, "a.md", "x");
        let archive =
            create_backup_stamped(&src, &dir.path().join("backups"), "2024-06-01_12-00-00")
                .unwrap();
        assert!(archive.ends_with("2024-06-01_12-00-00.zip"));
        assert!(archive.exists());
    }

    #[test]
    fn collisions_get_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write_file(&src, "a.md", "x");
        let backups = dir.path().join("backups");
        let first = create_backup_stamped(&src, &backups, "2024-06-01_12-00-00").unwrap();
        let second = create_backup_stamped(&src, &backups, "2024-06-01_12-00-00").unwrap();
        let third = create_backup_stamped(&src, &backups, "2024-06-01_12-00-00").unwrap();
        assert!(first.ends_with("2024-06-01_12-00-00.zip"));
        assert!(second.ends_with("2024-06-01_12-00-00-1.zip"));
        assert!(third.ends_with("2024-06-01_12-00-00-2.zip"));
    }

    #[test]
    fn missing_source_produces_empty_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = create_backup_stamped(
            &dir.path().join("absent"),
            &dir.path().join("backups"),
            "2024-06-01_12-00-00",
        )
        .unwrap();
        let reader = ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn zip_roundtrip_preserves_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write_file(&src, "settings.json", "{\"a\": 1}");
        write_file(&src, "commands/epic/plan.md", "# plan");
        write_file(&src, "agents/reviewer.md", "# reviewer");
        #[cfg(unix)]
        std::os::unix::fs::symlink("settings.json", src.join("link.json")).unwrap();

        let archive =
            create_backup_stamped(&src, &dir.path().join("backups"), "2024-06-01_12-00-00")
                .unwrap();
        let restored = dir.path().join("restored");
        extract_backup(&archive, &restored).unwrap();

        let original = DirTree::new(&src).index().unwrap().index;
        let roundtrip = DirTree::new(&restored).index().unwrap().index;
        assert!(
            diff(&original, &roundtrip).is_empty(),
            "restored tree must equal the original"
        );
    }

    #[test]
    fn extraction_rejects_escaping_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        {
            let mut writer = ZipWriter::new(fs::File::create(&archive).unwrap());
            writer
                .start_file("../outside.txt", SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"nope").unwrap();
            writer.finish().unwrap();
        }
        let result = extract_backup(&archive, &dir.path().join("out"));
        assert!(matches!(result, Err(BackupError::UnsafeEntry { .. })));
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[test]
    fn list_backups_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("backups");
        fs::create_dir_all(&backups).unwrap();
        fs::write(backups.join("2024-06-02_00-00-00.zip"), b"").unwrap();
        fs::write(backups.join("2024-06-01_00-00-00.zip"), b"").unwrap();
        fs::write(backups.join("notes.txt"), b"").unwrap();
        let listed = list_backups(&backups).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].ends_with("2024-06-01_00-00-00.zip"));
        assert!(listed[1].ends_with("2024-06-02_00-00-00.zip"));
    }

    #[test]
    fn list_backups_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_backups(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn backup_skips_nothing_in_plain_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        for i in 0..5 {
            write_file(&src, &format!("f{i}.md"), &format!("{i}"));
        }
        let archive =
            create_backup_stamped(&src, &dir.path().join("backups"), "2024-06-01_12-00-00")
                .unwrap();
        let reader = ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
        assert_eq!(reader.len(), 5);
    }
}
