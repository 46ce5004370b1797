//! Core value types for the configuration engine.
//!
//! Foundation types used throughout the engine: tree-relative paths and
//! content hashes. Both are validated newtypes — an instance that exists is
//! an instance that is well-formed.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// TreePath
// ---------------------------------------------------------------------------

/// A validated relative POSIX path inside a configuration tree.
///
/// Components are separated by `/` regardless of host OS. A `TreePath` is
/// never absolute, never contains `.` or `..` components, never contains a
/// backslash or NUL, and is never empty.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreePath(String);

impl TreePath {
    /// Create a new `TreePath` from a string, validating format.
    ///
    /// # Errors
    /// Returns an error if the path is empty, absolute, contains `.`/`..`
    /// components, empty components, backslashes, or NUL bytes.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the path as a `/`-separated string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The number of `/`-separated components.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }

    /// Iterate over the path components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// The first component of the path.
    #[must_use]
    pub fn first_component(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// The final component of the path.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Return the path stripped of its leading component, if more than one
    /// component remains.
    #[must_use]
    pub fn strip_first_component(&self) -> Option<Self> {
        self.0.split_once('/').map(|(_, rest)| Self(rest.to_owned()))
    }

    /// True if `other` is a strict ancestor directory of `self`.
    #[must_use]
    pub fn is_under(&self, other: &Self) -> bool {
        self.0.len() > other.0.len()
            && self.0.starts_with(other.0.as_str())
            && self.0.as_bytes()[other.0.len()] == b'/'
    }

    /// Convert to a host filesystem path under `root`.
    #[must_use]
    pub fn to_fs_path(&self, root: &std::path::Path) -> std::path::PathBuf {
        let mut out = root.to_path_buf();
        for component in self.components() {
            out.push(component);
        }
        out
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let reject = |reason: &str| {
            Err(ValidationError {
                kind: ErrorKind::TreePath,
                value: s.to_owned(),
                reason: reason.to_owned(),
            })
        };
        if s.is_empty() {
            return reject("path must not be empty");
        }
        if s.starts_with('/') {
            return reject("path must be relative (no leading '/')");
        }
        if s.contains('\\') {
            return reject("path must use '/' separators, not '\\'");
        }
        if s.contains('\0') {
            return reject("path must not contain NUL bytes");
        }
        for component in s.split('/') {
            if component.is_empty() {
                return reject("path must not contain empty components");
            }
            if component == "." || component == ".." {
                return reject("path must not contain '.' or '..' components");
            }
        }
        Ok(())
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TreePath {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TreePath {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<TreePath> for String {
    fn from(path: TreePath) -> Self {
        path.0
    }
}

// ---------------------------------------------------------------------------
// BlobHash
// ---------------------------------------------------------------------------

/// A validated 64-character lowercase hex SHA-256 content hash.
///
/// Two blobs are equal iff their hashes are equal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobHash(String);

impl BlobHash {
    /// Create a new `BlobHash` from a hex string, validating format.
    ///
    /// # Errors
    /// Returns an error if the string is not exactly 64 lowercase hex
    /// characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Hash a byte slice.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self::from_digest(hasher)
    }

    /// Hash everything a reader yields, streaming.
    ///
    /// Blob contents are never buffered whole; arbitrarily large files hash
    /// in constant memory.
    ///
    /// # Errors
    /// Returns any I/O error produced by the reader.
    pub fn of_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        io::copy(reader, &mut hasher)?;
        Ok(Self::from_digest(hasher))
    }

    /// Return the inner hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_digest(hasher: Sha256) -> Self {
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in &digest {
            use fmt::Write as _;
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.len() != 64 {
            return Err(ValidationError {
                kind: ErrorKind::BlobHash,
                value: s.to_owned(),
                reason: format!("expected 64 hex characters, got {}", s.len()),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(ValidationError {
                kind: ErrorKind::BlobHash,
                value: s.to_owned(),
                reason: "must contain only lowercase hex characters (0-9, a-f)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobHash {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BlobHash {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<BlobHash> for String {
    fn from(hash: BlobHash) -> Self {
        hash.0
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// The kind of value that failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A [`TreePath`] validation error.
    TreePath,
    /// A [`BlobHash`] validation error.
    BlobHash,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TreePath => write!(f, "TreePath"),
            Self::BlobHash => write!(f, "BlobHash"),
        }
    }
}

/// A validation error for engine value types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What kind of value was being validated.
    pub kind: ErrorKind,
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {}: {:?} — {}",
            self.kind, self.value, self.reason
        )
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
