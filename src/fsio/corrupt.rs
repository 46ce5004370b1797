//! JSON corruption detection.
//!
//! State files are JSON; a crashed writer or a bad disk leaves them
//! unparseable. [`detect`] runs a tolerant parse and, on failure, produces a
//! [`CorruptionReport`] locating the damage: byte offset, a short context
//! window around it, and a suggestion (truncation is recognized by scanning
//! for the last structurally balanced prefix). [`scan_tree`] sweeps a
//! directory for every corrupt `.json` file; the recovery tooling consumes
//! that list.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Bytes of context captured around the failure offset.
const CONTEXT_WINDOW: usize = 32;

// ---------------------------------------------------------------------------
// CorruptionReport
// ---------------------------------------------------------------------------

/// Where and how a JSON document is damaged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CorruptionReport {
    /// The file inspected.
    pub path: PathBuf,
    /// Byte offset of the parse failure.
    pub offset: usize,
    /// Up to 32 bytes around the offset, lossily decoded.
    pub context: String,
    /// The parser's message.
    pub message: String,
    /// Actionable hint, when one can be derived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl fmt::Display for CorruptionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} at byte {} (…{}…)",
            self.path.display(),
            self.message,
            self.offset,
            self.context
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n  Suggestion: {suggestion}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// True if `bytes` parse as a complete JSON document.
#[must_use]
pub fn is_clean(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde::de::IgnoredAny>(bytes).is_ok()
}

/// Inspect `bytes` (attributed to `path`) and report corruption, if any.
#[must_use]
pub fn inspect(path: &Path, bytes: &[u8]) -> Option<CorruptionReport> {
    let err = serde_json::from_slice::<serde::de::IgnoredAny>(bytes).err()?;
    let offset = offset_of(bytes, err.line(), err.column());
    let suggestion = suggest(bytes);
    Some(CorruptionReport {
        path: path.to_path_buf(),
        offset,
        context: context_window(bytes, offset),
        message: err.to_string(),
        suggestion,
    })
}

/// Read and inspect a file.
///
/// Returns `Ok(None)` for a clean file.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn detect(path: &Path) -> io::Result<Option<CorruptionReport>> {
    let bytes = fs::read(path)?;
    Ok(inspect(path, &bytes))
}

/// Sweep a directory tree for corrupt `.json` files.
///
/// Unreadable files count as corrupt (reported with the read error as the
/// message).
///
/// # Errors
/// Returns an error only if the walk itself fails.
pub fn scan_tree(root: &Path) -> io::Result<Vec<CorruptionReport>> {
    let mut reports = Vec::new();
    if !root.exists() {
        return Ok(reports);
    }
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));
    for item in walker {
        let entry = item.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match fs::read(entry.path()) {
            Ok(bytes) => {
                if let Some(report) = inspect(entry.path(), &bytes) {
                    reports.push(report);
                }
            }
            Err(err) => reports.push(CorruptionReport {
                path: entry.path().to_path_buf(),
                offset: 0,
                context: String::new(),
                message: format!("unreadable: {err}"),
                suggestion: None,
            }),
        }
    }
    Ok(reports)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert serde_json's 1-based line/column into a byte offset.
fn offset_of(bytes: &[u8], line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let mut remaining_newlines = line - 1;
    let mut offset = 0;
    for (i, byte) in bytes.iter().enumerate() {
        if remaining_newlines == 0 {
            break;
        }
        if *byte == b'\n' {
            remaining_newlines -= 1;
            offset = i + 1;
        }
    }
    (offset + column.saturating_sub(1)).min(bytes.len())
}

/// Lossily decode up to [`CONTEXT_WINDOW`] bytes centered on `offset`.
fn context_window(bytes: &[u8], offset: usize) -> String {
    let half = CONTEXT_WINDOW / 2;
    let start = offset.saturating_sub(half);
    let end = (offset + half).min(bytes.len());
    String::from_utf8_lossy(&bytes[start..end])
        .replace(['\n', '\r'], "␤")
}

/// Derive a suggestion by scanning for the last balanced prefix.
///
/// Tracks brace/bracket depth outside strings. If the document ends (or the
/// scan does) at non-zero depth, it was truncated mid-structure and the last
/// offset at which the structure was balanced is reported.
fn suggest(bytes: &[u8]) -> Option<String> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut last_balanced = 0usize;
    let mut seen_structure = false;

    for (i, byte) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                seen_structure = true;
            }
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    last_balanced = i + 1;
                }
            }
            _ => {}
        }
    }

    if seen_structure && (depth > 0 || in_string) {
        Some(format!(
            "truncated object — last balanced prefix ends at offset {last_balanced}"
        ))
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
