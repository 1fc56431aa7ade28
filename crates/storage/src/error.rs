// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Errors raised by WAL file operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Missing or wrong magic, or a non-zero byte in the reserved header region
    #[error("invalid WAL header in {path}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// Frame marker mismatch or a record cut short by the end of the file
    #[error("corrupt record at byte {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    /// The record framed correctly but carries an action code we don't know
    #[error("unknown action code {code} at byte {offset}")]
    UnknownAction { offset: u64, code: u16 },

    #[error("{field} is {len} bytes, limit is 65535")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("WAL file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("WAL file is read-only: {0}")]
    ReadOnly(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("WAL file manager is closed")]
    Closed,
}

impl WalError {
    /// True when the error means the rest of the file cannot be framed
    pub fn is_corruption(&self) -> bool {
        matches!(self, WalError::CorruptRecord { .. })
    }
}
