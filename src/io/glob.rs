//! Shard file discovery.
//!
//! Readers locate shards with a glob pattern evaluated under a data
//! directory (e.g. `record_train_*.rec*`). Results are files only, sorted
//! lexicographically so the unshuffled read order is deterministic.

use anyhow::{Context, Result, bail};
use glob::glob;
use std::path::{Path, PathBuf};

/// Expand `pattern` relative to `data_dir` into a sorted list of files.
///
/// Supports standard glob syntax (`*`, `?`, `**`, `[abc]`, `[!abc]`).
/// A pattern that matches nothing yields an empty vector.
///
/// # Errors
///
/// Returns an error if the pattern is invalid or a matched entry cannot be
/// read.
pub fn expand_glob(data_dir: impl AsRef<Path>, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = data_dir.as_ref().join(pattern);
    let full = full.to_string_lossy();
    let paths = glob(&full).with_context(|| format!("invalid glob pattern: {full}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path = entry.with_context(|| format!("error reading glob entry for pattern: {full}"))?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// Like [`expand_glob`], but zero matches is an error.
///
/// # Errors
///
/// Returns an error if the pattern is invalid, unreadable, or matches no files.
pub fn expand_glob_required(data_dir: impl AsRef<Path>, pattern: &str) -> Result<Vec<PathBuf>> {
    let files = expand_glob(&data_dir, pattern)?;
    if files.is_empty() {
        bail!(
            "no files found matching pattern: {}",
            data_dir.as_ref().join(pattern).display()
        );
    }
    Ok(files)
}
