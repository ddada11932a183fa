//! Input pattern expansion for multi-file imports.
//!
//! A pattern such as `incoming/2024-*/*.csv.gz` resolves to the matching
//! regular files in sorted order, so runs over the same file set are started
//! in a deterministic sequence.

use anyhow::{Context, Result, bail};
use glob::glob;
use std::path::PathBuf;

/// Characters that make an argument a glob pattern instead of a literal path.
const GLOB_META: &[char] = &['*', '?', '['];

#[must_use]
pub fn is_pattern(arg: &str) -> bool {
    arg.contains(GLOB_META)
}

/// Expand `pattern` into the sorted list of matching files. Directories are
/// ignored; no match yields an empty list.
///
/// # Errors
///
/// Returns an error for an invalid pattern or an unreadable directory entry.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Resolve command-line style inputs: patterns are expanded, literal paths
/// are kept as given (even if missing, so the run reports the failure).
/// Duplicates are dropped, first occurrence wins.
///
/// # Errors
///
/// Returns an error if a pattern is invalid or matches nothing.
pub fn resolve_inputs<S: AsRef<str>>(args: &[S]) -> Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = Vec::new();
    for arg in args {
        let arg = arg.as_ref();
        let expanded = if is_pattern(arg) {
            let files = expand_glob(arg)?;
            if files.is_empty() {
                bail!("no files found matching pattern: {arg}");
            }
            files
        } else {
            vec![PathBuf::from(arg)]
        };
        for path in expanded {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    Ok(out)
}
