// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Locating WAL files on disk
//!
//! File names embed their creation time (`<prefix><nanos>.wal`), so ordering
//! by that timestamp is chronological order.

use crate::error::WalError;
use std::fs;
use std::path::{Path, PathBuf};

const EXTENSION: &str = ".wal";

/// A WAL file found in a directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct WalFileName {
    /// Creation time in nanoseconds, parsed from the name
    pub created_at: u64,
    pub path: PathBuf,
}

/// Build the file name for a WAL file created at `created_at`
pub fn wal_file_name(prefix: &str, created_at: u64) -> String {
    format!("{}{}{}", prefix, created_at, EXTENSION)
}

/// Parse the creation timestamp out of `<prefix><digits>.wal`
pub fn parse_created_at(file_name: &str, prefix: &str) -> Option<u64> {
    let digits = file_name.strip_prefix(prefix)?.strip_suffix(EXTENSION)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List WAL files in `dir` carrying `prefix`, oldest first
///
/// Entries whose names share the prefix but don't follow the naming scheme
/// are ignored, as are subdirectories.
pub fn list_wal_files(dir: &Path, prefix: &str) -> Result<Vec<WalFileName>, WalError> {
    let meta = fs::metadata(dir)?;
    if !meta.is_dir() {
        return Err(WalError::NotADirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(created_at) = parse_created_at(name, prefix) {
            files.push(WalFileName {
                created_at,
                path: entry.path(),
            });
        }
    }

    files.sort();
    Ok(files)
}

/// Files that may hold entries with a timestamp after `timestamp`
///
/// Returns the newest file created at or before `timestamp` (it can hold
/// entries up to the next file's creation) plus every file created after it,
/// oldest first.
pub fn find_files_on_or_after(
    dir: &Path,
    prefix: &str,
    timestamp: u64,
) -> Result<Vec<WalFileName>, WalError> {
    let files = list_wal_files(dir, prefix)?;
    let first = files
        .iter()
        .rposition(|f| f.created_at <= timestamp)
        .unwrap_or(0);
    Ok(files.into_iter().skip(first).collect())
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
