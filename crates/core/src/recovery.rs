// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup recovery: replay WAL files into a matching engine
//!
//! Runs against the base engine before the pool copies it. Files are read
//! oldest first. A corrupt frame ends the current file and replay moves on
//! to the next one; only an unreadable directory or file is fatal.

use crate::matcher::Matcher;
use crate::mutation::Mutation;
use crate::watermark::Watermark;
use munchkin_storage::{list_wal_files, WalError, WalFile};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("cannot list WAL directory {dir}: {source}")]
    Directory {
        dir: PathBuf,
        #[source]
        source: WalError,
    },
    #[error("cannot open WAL file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: WalError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub files: usize,
    pub applied: u64,
    /// Below the watermark or not a valid mutation
    pub skipped: u64,
    /// Unreadable records and engine rejections
    pub failed: u64,
    /// Watermark after replay
    pub watermark: u64,
}

/// Replay every `<prefix>*.wal` file in `dir` into `engine`.
///
/// Entries with `timestamp >= watermark` are applied; each applied entry
/// advances `watermark`.
pub fn recover<M: Matcher>(
    engine: &mut M,
    dir: &Path,
    prefix: &str,
    watermark: &Watermark,
) -> Result<RecoveryReport, RecoveryError> {
    let files = list_wal_files(dir, prefix).map_err(|source| RecoveryError::Directory {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut report = RecoveryReport::default();
    for name in files {
        let mut file = WalFile::open(&name.path).map_err(|source| RecoveryError::File {
            path: name.path.clone(),
            source,
        })?;
        report.files += 1;
        replay_file(engine, &mut file, watermark, &mut report);
        tracing::debug!(
            path = %name.path.display(),
            entries = file.entries_read(),
            "replayed WAL file"
        );
    }

    report.watermark = watermark.get();
    tracing::info!(
        dir = %dir.display(),
        files = report.files,
        applied = report.applied,
        skipped = report.skipped,
        failed = report.failed,
        watermark = report.watermark,
        "WAL recovery complete"
    );
    Ok(report)
}

fn replay_file<M: Matcher>(
    engine: &mut M,
    file: &mut WalFile,
    watermark: &Watermark,
    report: &mut RecoveryReport,
) {
    let path = file.path().to_path_buf();
    for result in file.entries() {
        let entry = match result {
            Ok(entry) => entry,
            Err(e @ WalError::UnknownAction { .. }) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                report.failed += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "abandoning rest of WAL file");
                report.failed += 1;
                break;
            }
        };

        if entry.timestamp < watermark.get() {
            report.skipped += 1;
            continue;
        }
        let mutation = match Mutation::from_entry(&entry) {
            Ok(mutation) => mutation,
            Err(e) => {
                tracing::debug!(timestamp = entry.timestamp, error = %e, "skipping invalid entry");
                report.skipped += 1;
                continue;
            }
        };

        let applied = match &mutation {
            Mutation::Add { key, pattern } => engine.add_pattern(key, pattern),
            Mutation::Delete { key } => engine.delete_patterns(key),
        };
        match applied {
            Ok(()) => {
                watermark.advance(entry.timestamp);
                report.applied += 1;
            }
            Err(e) => {
                tracing::warn!(
                    key = mutation.key(),
                    timestamp = entry.timestamp,
                    error = %e,
                    "engine rejected replayed entry"
                );
                report.failed += 1;
            }
        }
    }
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
