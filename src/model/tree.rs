//! Tree enumeration, hashing, and indexes.
//!
//! A *tree* is a mapping from [`TreePath`] to blob content. This module
//! defines:
//!
//! - [`TreeEntry`] / [`TreeIndex`] — the hashed snapshot of a tree, ordered
//!   lexicographically by path (a `BTreeMap` underneath, so ordering is a
//!   structural property rather than a sort step).
//! - [`TreeSource`] — the capability to enumerate a tree and open its blobs.
//!   Implemented by [`DirTree`] (a directory on disk) and [`MemTree`]
//!   (an in-memory tree, used for the embedded upstream and in tests).
//! - Canonical digests: [`TreeIndex::digest`] hashes the sorted
//!   `(path, kind, hash)` tuples and backs the baseline digest recorded in
//!   `meta.json`.
//!
//! Directory walking is deterministic (entries sorted per level, symlinks
//! never followed), skips a built-in ignore list, reports unreadable entries
//! out of band, and hashes file contents on a bounded worker pool.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::{BlobHash, TreePath, ValidationError};

/// File names ignored at any depth.
const IGNORED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", ".lock"];

/// Relative path prefixes ignored wherever a walk starts.
const IGNORED_PREFIXES: &[&str] = &[".wm/backups", ".wm/sandbox"];

/// Default upper bound on concurrent hashing workers.
const MAX_HASH_WORKERS: usize = 8;

// ---------------------------------------------------------------------------
// TreeEntry
// ---------------------------------------------------------------------------

/// What kind of object a tree entry is.
///
/// Directories are implicit (derived from path prefixes) and never appear as
/// entries. A symlink's blob content is its target string; symlinks are not
/// followed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeEntryKind {
    /// A regular file.
    File,
    /// A symbolic link (blob = link target).
    Link,
}

/// One hashed entry of a tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Path relative to the tree root.
    pub path: TreePath,
    /// Entry kind.
    pub kind: TreeEntryKind,
    /// SHA-256 of the blob content.
    pub hash: BlobHash,
    /// Blob size in bytes.
    pub size: u64,
}

// ---------------------------------------------------------------------------
// TreeIndex
// ---------------------------------------------------------------------------

/// The hashed snapshot of a tree: path → entry, lexicographically ordered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeIndex {
    entries: BTreeMap<TreePath, TreeEntry>,
}

impl TreeIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any previous entry at the same path.
    pub fn insert(&mut self, entry: TreeEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    /// Look up an entry by path.
    #[must_use]
    pub fn get(&self, path: &TreePath) -> Option<&TreeEntry> {
        self.entries.get(path)
    }

    /// True if the index has an entry at `path`.
    #[must_use]
    pub fn contains(&self, path: &TreePath) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in lexicographic path order.
    pub fn iter(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    /// Iterate paths in lexicographic order.
    pub fn paths(&self) -> impl Iterator<Item = &TreePath> {
        self.entries.keys()
    }

    /// Canonical digest of the index.
    ///
    /// SHA-256 over `<path> NUL <kind-byte> <hash-hex> LF` per entry, in
    /// lexicographic path order. Two trees with identical content always
    /// produce identical digests regardless of how they were enumerated.
    #[must_use]
    pub fn digest(&self) -> BlobHash {
        let mut hasher = Sha256::new();
        for entry in self.entries.values() {
            hasher.update(entry.path.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(match entry.kind {
                TreeEntryKind::File => b"f",
                TreeEntryKind::Link => b"l",
            });
            hasher.update(entry.hash.as_str().as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in &digest {
            use fmt::Write as _;
            let _ = write!(hex, "{byte:02x}");
        }
        BlobHash::new(&hex).expect("sha256 hex is always a valid BlobHash")
    }
}

impl<'a> IntoIterator for &'a TreeIndex {
    type Item = &'a TreeEntry;
    type IntoIter = std::collections::btree_map::Values<'a, TreePath, TreeEntry>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from tree enumeration or blob access.
#[derive(Debug)]
pub enum TreeError {
    /// An I/O error on a specific filesystem path.
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// An on-disk name did not form a valid [`TreePath`].
    InvalidPath(ValidationError),
    /// A blob was requested at a path the tree does not contain.
    NotFound {
        /// The missing path.
        path: TreePath,
    },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "I/O error at {}: {source}", path.display())
            }
            Self::InvalidPath(err) => write!(f, "{err}"),
            Self::NotFound { path } => write!(f, "no blob at '{path}' in this tree"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::InvalidPath(err) => Some(err),
            Self::NotFound { .. } => None,
        }
    }
}

impl From<ValidationError> for TreeError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidPath(err)
    }
}

/// An entry the walker could not read.
///
/// Unreadable entries never abort a walk; they are reported out of band and
/// the caller decides whether to proceed.
#[derive(Debug)]
pub struct WalkError {
    /// The filesystem path that failed.
    pub path: PathBuf,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// The result of walking a tree: the index plus any per-entry errors.
#[derive(Debug, Default)]
pub struct WalkReport {
    /// The hashed index of everything readable.
    pub index: TreeIndex,
    /// Entries that could not be read.
    pub errors: Vec<WalkError>,
}

// ---------------------------------------------------------------------------
// TreeSource
// ---------------------------------------------------------------------------

/// The capability to enumerate a tree and open its blobs.
pub trait TreeSource {
    /// Enumerate and hash every entry.
    ///
    /// # Errors
    /// Returns an error only for failures that invalidate the whole walk
    /// (e.g. the root is missing); per-entry failures land in
    /// [`WalkReport::errors`].
    fn index(&self) -> Result<WalkReport, TreeError>;

    /// Read the blob content at `path`.
    ///
    /// For a symlink entry this is the link target string.
    ///
    /// # Errors
    /// Returns [`TreeError::NotFound`] if the tree has no entry at `path`,
    /// or an I/O error.
    fn read_blob(&self, path: &TreePath) -> Result<Vec<u8>, TreeError>;
}

// ---------------------------------------------------------------------------
// DirTree
// ---------------------------------------------------------------------------

/// A tree rooted at a directory on the host filesystem.
///
/// A missing root enumerates as an empty tree — an uninstalled local tree
/// and an empty one are indistinguishable to the differ, which is what the
/// planner wants.
#[derive(Clone, Debug)]
pub struct DirTree {
    root: PathBuf,
    workers: usize,
}

impl DirTree {
    /// Create a tree handle rooted at `root` with the default worker bound.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            workers: default_workers(),
        }
    }

    /// Override the hashing worker count (clamped to at least 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// The tree's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collect the relative paths of walkable entries, sorted per level,
    /// with ignore rules applied. Directories are traversed, not emitted.
    fn collect_paths(&self, errors: &mut Vec<WalkError>) -> Vec<(TreePath, bool)> {
        let mut found = Vec::new();
        let walker = walkdir::WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));
        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    errors.push(WalkError {
                        path: err.path().map_or_else(PathBuf::new, Path::to_path_buf),
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let Some(rel_str) = rel_to_posix(rel) else {
                errors.push(WalkError {
                    path: entry.path().to_path_buf(),
                    message: "non-UTF-8 file name".to_owned(),
                });
                continue;
            };
            if is_ignored(&rel_str) {
                continue;
            }
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            let is_link = file_type.is_symlink();
            if !is_link && !file_type.is_file() {
                // Sockets, fifos, devices: report and move on.
                errors.push(WalkError {
                    path: entry.path().to_path_buf(),
                    message: "unsupported file type".to_owned(),
                });
                continue;
            }
            match TreePath::new(&rel_str) {
                Ok(path) => found.push((path, is_link)),
                Err(err) => errors.push(WalkError {
                    path: entry.path().to_path_buf(),
                    message: err.to_string(),
                }),
            }
        }
        found
    }

    /// Hash one entry.
    fn hash_entry(&self, path: &TreePath, is_link: bool) -> Result<TreeEntry, WalkError> {
        let fs_path = path.to_fs_path(&self.root);
        let io_err = |source: io::Error| WalkError {
            path: fs_path.clone(),
            message: source.to_string(),
        };
        if is_link {
            let target = fs::read_link(&fs_path).map_err(io_err)?;
            let bytes = target.to_string_lossy().into_owned().into_bytes();
            Ok(TreeEntry {
                path: path.clone(),
                kind: TreeEntryKind::Link,
                hash: BlobHash::of_bytes(&bytes),
                size: bytes.len() as u64,
            })
        } else {
            let mut file = fs::File::open(&fs_path).map_err(&io_err)?;
            let size = file.metadata().map_err(&io_err)?.len();
            let hash = BlobHash::of_reader(&mut file).map_err(io_err)?;
            Ok(TreeEntry {
                path: path.clone(),
                kind: TreeEntryKind::File,
                hash,
                size,
            })
        }
    }
}

impl TreeSource for DirTree {
    fn index(&self) -> Result<WalkReport, TreeError> {
        if !self.root.exists() {
            return Ok(WalkReport::default());
        }
        let mut errors = Vec::new();
        let paths = self.collect_paths(&mut errors);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|err| TreeError::Io {
                path: self.root.clone(),
                source: io::Error::other(err),
            })?;

        let results: Vec<Result<TreeEntry, WalkError>> = pool.install(|| {
            paths
                .par_iter()
                .map(|(path, is_link)| self.hash_entry(path, *is_link))
                .collect()
        });

        let mut index = TreeIndex::new();
        for result in results {
            match result {
                Ok(entry) => index.insert(entry),
                Err(err) => errors.push(err),
            }
        }
        Ok(WalkReport { index, errors })
    }

    fn read_blob(&self, path: &TreePath) -> Result<Vec<u8>, TreeError> {
        let fs_path = path.to_fs_path(&self.root);
        let metadata = fs::symlink_metadata(&fs_path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                TreeError::NotFound { path: path.clone() }
            } else {
                TreeError::Io {
                    path: fs_path.clone(),
                    source,
                }
            }
        })?;
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&fs_path).map_err(|source| TreeError::Io {
                path: fs_path.clone(),
                source,
            })?;
            Ok(target.to_string_lossy().into_owned().into_bytes())
        } else {
            fs::read(&fs_path).map_err(|source| TreeError::Io {
                path: fs_path,
                source,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// MemTree
// ---------------------------------------------------------------------------

/// An in-memory tree.
///
/// Backs the embedded upstream (whose blobs live in the binary) and makes
/// planner and applier behavior testable without touching the filesystem.
#[derive(Clone, Debug, Default)]
pub struct MemTree {
    blobs: BTreeMap<TreePath, (TreeEntryKind, Vec<u8>)>,
}

impl MemTree {
    /// An empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a regular file blob.
    pub fn insert(&mut self, path: TreePath, bytes: impl Into<Vec<u8>>) {
        self.blobs.insert(path, (TreeEntryKind::File, bytes.into()));
    }

    /// Insert a symlink blob (content = target string).
    pub fn insert_link(&mut self, path: TreePath, target: impl Into<String>) {
        self.blobs
            .insert(path, (TreeEntryKind::Link, target.into().into_bytes()));
    }

    /// Number of blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// True if the tree has no blobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl TreeSource for MemTree {
    fn index(&self) -> Result<WalkReport, TreeError> {
        let mut index = TreeIndex::new();
        for (path, (kind, bytes)) in &self.blobs {
            if is_ignored(path.as_str()) {
                continue;
            }
            index.insert(TreeEntry {
                path: path.clone(),
                kind: *kind,
                hash: BlobHash::of_bytes(bytes),
                size: bytes.len() as u64,
            });
        }
        Ok(WalkReport {
            index,
            errors: Vec::new(),
        })
    }

    fn read_blob(&self, path: &TreePath) -> Result<Vec<u8>, TreeError> {
        self.blobs
            .get(path)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| TreeError::NotFound { path: path.clone() })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Bounded hashing concurrency: `min(available cores, 8)`.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .min(MAX_HASH_WORKERS)
}

/// Convert a host-relative path to a POSIX string, or `None` if non-UTF-8.
fn rel_to_posix(rel: &Path) -> Option<String> {
    let mut out = String::new();
    for component in rel.components() {
        let part = component.as_os_str().to_str()?;
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(part);
    }
    Some(out)
}

/// Built-in ignore rules, applied to relative POSIX paths.
fn is_ignored(rel: &str) -> bool {
    for prefix in IGNORED_PREFIXES {
        if rel == *prefix || rel.starts_with(&format!("{prefix}/")) {
            return true;
        }
    }
    let name = rel.rsplit('/').next().unwrap_or(rel);
    if IGNORED_NAMES.contains(&name) {
        return true;
    }
    name.ends_with(".swp")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tp(s: &str) -> TreePath {
        TreePath::new(s).unwrap()
    }

    fn write_file(root: &Path, rel: &str, content: &str) {
        let full = root.join(rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    // -- ignore rules --

    #[test]
    fn ignores_ds_store_and_swp() {
        assert!(is_ignored(".DS_Store"));
        assert!(is_ignored("a/b/.DS_Store"));
        assert!(is_ignored("Thumbs.db"));
        assert!(is_ignored("src/main.rs.swp"));
        assert!(!is_ignored("src/main.rs"));
    }

    #[test]
    fn ignores_backup_and_sandbox_prefixes() {
        assert!(is_ignored(".wm/backups/2024-01-01_00-00-00.zip"));
        assert!(is_ignored(".wm/sandbox"));
        assert!(is_ignored(".wm/sandbox/x/y"));
        assert!(!is_ignored(".wm/baseline/settings.json"));
    }

    #[test]
    fn ignores_lock_sidecars() {
        assert!(is_ignored(".lock"));
        assert!(is_ignored(".wm/.lock"));
    }

    // -- DirTree --

    #[test]
    fn dir_tree_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tree = DirTree::new(dir.path().join("absent"));
        let report = tree.index().unwrap();
        assert!(report.index.is_empty());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn dir_tree_indexes_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "settings.json", "{}");
        write_file(dir.path(), "commands/plan.md", "# plan");
        let report = DirTree::new(dir.path()).index().unwrap();
        assert_eq!(report.index.len(), 2);
        let entry = report.index.get(&tp("commands/plan.md")).unwrap();
        assert_eq!(entry.kind, TreeEntryKind::File);
        assert_eq!(entry.hash, BlobHash::of_bytes(b"# plan"));
        assert_eq!(entry.size, 6);
    }

    #[test]
    fn dir_tree_skips_ignored_entries() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "keep.md", "x");
        write_file(dir.path(), ".DS_Store", "junk");
        write_file(dir.path(), "editor.swp", "junk");
        let report = DirTree::new(dir.path()).index().unwrap();
        assert_eq!(report.index.len(), 1);
        assert!(report.index.contains(&tp("keep.md")));
    }

    #[cfg(unix)]
    #[test]
    fn dir_tree_symlink_blob_is_target() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "real.md", "content");
        std::os::unix::fs::symlink("real.md", dir.path().join("alias.md")).unwrap();
        let tree = DirTree::new(dir.path());
        let report = tree.index().unwrap();
        let entry = report.index.get(&tp("alias.md")).unwrap();
        assert_eq!(entry.kind, TreeEntryKind::Link);
        assert_eq!(entry.hash, BlobHash::of_bytes(b"real.md"));
        assert_eq!(tree.read_blob(&tp("alias.md")).unwrap(), b"real.md");
    }

    #[test]
    fn dir_tree_read_blob_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tree = DirTree::new(dir.path());
        assert!(matches!(
            tree.read_blob(&tp("missing.txt")),
            Err(TreeError::NotFound { .. })
        ));
    }

    #[test]
    fn dir_tree_index_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["z.md", "a.md", "m/nested.md", "m/a.md"] {
            write_file(dir.path(), name, name);
        }
        let tree = DirTree::new(dir.path());
        let first = tree.index().unwrap().index;
        let second = tree.index().unwrap().index;
        assert_eq!(first, second);
        let paths: Vec<_> = first.paths().map(TreePath::as_str).collect();
        let mut sorted = paths.clone();
        sorted.sort_unstable();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn dir_tree_single_worker_matches_parallel() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..20 {
            write_file(dir.path(), &format!("f{i:02}.txt"), &format!("content {i}"));
        }
        let parallel = DirTree::new(dir.path()).index().unwrap().index;
        let serial = DirTree::new(dir.path()).with_workers(1).index().unwrap().index;
        assert_eq!(parallel, serial);
        assert_eq!(parallel.digest(), serial.digest());
    }

    // -- MemTree --

    #[test]
    fn mem_tree_roundtrip() {
        let mut tree = MemTree::new();
        tree.insert(tp("a.txt"), "alpha");
        tree.insert_link(tp("b"), "a.txt");
        let report = tree.index().unwrap();
        assert_eq!(report.index.len(), 2);
        assert_eq!(
            report.index.get(&tp("b")).unwrap().kind,
            TreeEntryKind::Link
        );
        assert_eq!(tree.read_blob(&tp("a.txt")).unwrap(), b"alpha");
        assert!(matches!(
            tree.read_blob(&tp("c")),
            Err(TreeError::NotFound { .. })
        ));
    }

    #[test]
    fn mem_and_dir_trees_agree_on_digest() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "x/y.md", "same bytes");
        write_file(dir.path(), "z.md", "more bytes");

        let mut mem = MemTree::new();
        mem.insert(tp("x/y.md"), "same bytes");
        mem.insert(tp("z.md"), "more bytes");

        let from_dir = DirTree::new(dir.path()).index().unwrap().index;
        let from_mem = mem.index().unwrap().index;
        assert_eq!(from_dir.digest(), from_mem.digest());
    }

    // -- digest --

    #[test]
    fn digest_changes_with_content() {
        let mut a = MemTree::new();
        a.insert(tp("f"), "1");
        let mut b = MemTree::new();
        b.insert(tp("f"), "2");
        assert_ne!(
            a.index().unwrap().index.digest(),
            b.index().unwrap().index.digest()
        );
    }

    #[test]
    fn digest_changes_with_kind() {
        let mut a = MemTree::new();
        a.insert(tp("f"), "target");
        let mut b = MemTree::new();
        b.insert_link(tp("f"), "target");
        assert_ne!(
            a.index().unwrap().index.digest(),
            b.index().unwrap().index.digest()
        );
    }

    #[test]
    fn empty_digest_is_stable() {
        assert_eq!(TreeIndex::new().digest(), TreeIndex::new().digest());
    }

    #[test]
    fn default_workers_bounded() {
        let workers = default_workers();
        assert!(workers >= 1);
        assert!(workers <= MAX_HASH_WORKERS);
    }
}
