// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL record layout
//!
//! Records are written back-to-back after the file header:
//!
//! ```text
//! [0x00][timestamp u64 BE][key_len u16 BE][pattern_len u16 BE][key][pattern][action u16 BE]
//! ```

use crate::error::WalError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// First byte of every record
pub const FRAME_MARKER: u8 = 0x00;

/// Marker, timestamp and both length fields
pub const RECORD_HEADER_LEN: usize = 13;

/// Size of a record with an empty key and an empty pattern
pub const MIN_RECORD_LEN: u64 = RECORD_HEADER_LEN as u64 + ACTION_LEN as u64;

const ACTION_LEN: usize = 2;

/// Kind of mutation a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Delete,
}

impl Action {
    /// On-disk action code
    pub const fn code(self) -> u16 {
        match self {
            Action::Add => 32,
            Action::Delete => 64,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            32 => Some(Action::Add),
            64 => Some(Action::Delete),
            _ => None,
        }
    }
}

/// A single logged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Nanoseconds since the Unix epoch; ordering and version key
    pub timestamp: u64,
    pub key: Vec<u8>,
    /// Rule body; empty for deletes
    pub pattern: Vec<u8>,
    pub action: Action,
}

impl WalEntry {
    pub fn add(timestamp: u64, key: impl Into<Vec<u8>>, pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            key: key.into(),
            pattern: pattern.into(),
            action: Action::Add,
        }
    }

    pub fn delete(timestamp: u64, key: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            key: key.into(),
            pattern: Vec::new(),
            action: Action::Delete,
        }
    }

    pub fn key_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.key)
    }

    /// Number of bytes this entry occupies on disk
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.key.len() + self.pattern.len() + ACTION_LEN
    }

    /// Encode into the on-disk record layout
    pub fn encode(&self) -> Result<Vec<u8>, WalError> {
        let key_len = field_len("key", &self.key)?;
        let pattern_len = field_len("pattern", &self.pattern)?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(FRAME_MARKER);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&key_len.to_be_bytes());
        buf.extend_from_slice(&pattern_len.to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.pattern);
        buf.extend_from_slice(&self.action.code().to_be_bytes());
        Ok(buf)
    }
}

fn field_len(field: &'static str, bytes: &[u8]) -> Result<u16, WalError> {
    u16::try_from(bytes.len()).map_err(|_| WalError::FieldTooLong {
        field,
        len: bytes.len(),
    })
}

/// Fixed-size prefix of a record, parsed before the variable-length body is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// File offset of the frame marker
    pub offset: u64,
    pub timestamp: u64,
    pub key_len: u16,
    pub pattern_len: u16,
}

impl RecordHeader {
    pub fn parse(buf: &[u8; RECORD_HEADER_LEN], offset: u64) -> Result<Self, WalError> {
        if buf[0] != FRAME_MARKER {
            return Err(WalError::CorruptRecord {
                offset,
                reason: format!("frame marker is {:#04x}", buf[0]),
            });
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&buf[1..9]);
        Ok(Self {
            offset,
            timestamp: u64::from_be_bytes(ts),
            key_len: u16::from_be_bytes([buf[9], buf[10]]),
            pattern_len: u16::from_be_bytes([buf[11], buf[12]]),
        })
    }

    /// Bytes that follow the header: key, pattern and action code
    pub fn body_len(&self) -> usize {
        usize::from(self.key_len) + usize::from(self.pattern_len) + ACTION_LEN
    }

    /// Total record size including the header
    pub fn record_len(&self) -> u64 {
        (RECORD_HEADER_LEN + self.body_len()) as u64
    }

    /// Build the entry from a body of exactly `body_len()` bytes
    pub fn finish(self, body: &[u8]) -> Result<WalEntry, WalError> {
        if body.len() != self.body_len() {
            return Err(WalError::CorruptRecord {
                offset: self.offset,
                reason: format!("expected {} body bytes, got {}", self.body_len(), body.len()),
            });
        }
        let key_end = usize::from(self.key_len);
        let pattern_end = key_end + usize::from(self.pattern_len);
        let code = u16::from_be_bytes([body[pattern_end], body[pattern_end + 1]]);
        let action = Action::from_code(code).ok_or(WalError::UnknownAction {
            offset: self.offset,
            code,
        })?;

        Ok(WalEntry {
            timestamp: self.timestamp,
            key: body[..key_end].to_vec(),
            pattern: body[key_end..pattern_end].to_vec(),
            action,
        })
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
