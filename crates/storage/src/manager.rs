// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Active-file ownership and rotation
//!
//! The manager keeps exactly one file open for appends. Once the file holds
//! `max_entries_per_file` records the next write first rotates to a fresh
//! file. Rotation and appends take the same lock, so a record never straddles
//! two files and a rotated-away file is never written again.

use crate::entry::WalEntry;
use crate::error::WalError;
use crate::file::WalFile;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Where and how the manager writes files
#[derive(Debug, Clone)]
pub struct WalManagerConfig {
    pub dir: PathBuf,
    pub prefix: String,
    pub max_entries_per_file: u64,
}

struct ActiveFile {
    file: Option<WalFile>,
    created_at: u64,
    current_entries: u64,
    total_entries: u64,
}

/// Owns the file currently being appended to
pub struct WalFileManager {
    config: WalManagerConfig,
    active: Mutex<ActiveFile>,
}

impl WalFileManager {
    /// Create the directory if needed and open a new file in it
    pub fn new(config: WalManagerConfig) -> Result<Self, WalError> {
        std::fs::create_dir_all(&config.dir)?;
        let config = WalManagerConfig {
            max_entries_per_file: config.max_entries_per_file.max(1),
            ..config
        };

        let (file, created_at) = open_new_file(&config, 0)?;
        info!(path = %file.path().display(), "writing WAL files to {}", config.dir.display());

        Ok(Self {
            config,
            active: Mutex::new(ActiveFile {
                file: Some(file),
                created_at,
                current_entries: 0,
                total_entries: 0,
            }),
        })
    }

    /// Append an entry, logging rather than returning any failure
    ///
    /// Losing the durability side-channel must not fail the mutation that
    /// produced the entry.
    pub fn write_entry(&self, entry: &WalEntry) {
        if let Err(e) = self.try_write_entry(entry) {
            error!(
                error = %e,
                timestamp = entry.timestamp,
                key = %entry.key_str(),
                "WAL write failed"
            );
        }
    }

    /// Append an entry, rotating first if the current file is full
    pub fn try_write_entry(&self, entry: &WalEntry) -> Result<(), WalError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.file.is_none() {
            return Err(WalError::Closed);
        }
        if active.current_entries >= self.config.max_entries_per_file {
            // Keep appending to the full file; the next write retries.
            if let Err(e) = self.rotate_locked(&mut active) {
                warn!(
                    dir = %self.config.dir.display(),
                    entries = active.current_entries,
                    error = %e,
                    "WAL rotation failed, writing past the file limit"
                );
            }
        }

        let file = active.file.as_mut().ok_or(WalError::Closed)?;
        file.write(entry)?;
        active.current_entries += 1;
        active.total_entries += 1;
        Ok(())
    }

    /// Close the current file and start a new one
    pub fn rotate(&self) -> Result<PathBuf, WalError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.file.is_none() {
            return Err(WalError::Closed);
        }
        self.rotate_locked(&mut active)
    }

    /// Open the next file, then retire the current one. On failure the
    /// current file stays active.
    fn rotate_locked(&self, active: &mut ActiveFile) -> Result<PathBuf, WalError> {
        let (file, created_at) = open_new_file(&self.config, active.created_at)?;
        let path = file.path().to_path_buf();

        if let Some(old) = active.file.replace(file) {
            let old_path = old.path().to_path_buf();
            if let Err(e) = old.close() {
                warn!(path = %old_path.display(), error = %e, "failed to sync rotated WAL file");
            }
        }
        info!(
            path = %path.display(),
            previous_entries = active.current_entries,
            "rotated WAL file"
        );
        active.created_at = created_at;
        active.current_entries = 0;
        Ok(path)
    }

    /// Sync and close the current file; later writes fail with [`WalError::Closed`]
    pub fn close(&self) -> Result<(), WalError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.file.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.file.as_ref().map(|f| f.path().to_path_buf())
    }

    pub fn current_entries(&self) -> u64 {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current_entries
    }

    /// Entries written through this manager across all files
    pub fn total_entries(&self) -> u64 {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .total_entries
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }
}

/// Create and open a file whose creation time sorts after `previous`
fn open_new_file(config: &WalManagerConfig, previous: u64) -> Result<(WalFile, u64), WalError> {
    let mut created_at = crate::unix_nanos().max(previous + 1);
    loop {
        match WalFile::create_at(&config.dir, &config.prefix, created_at) {
            Ok(path) => return Ok((WalFile::open(&path)?, created_at)),
            // Another writer claimed this nanosecond
            Err(WalError::AlreadyExists(_)) => created_at += 1,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
