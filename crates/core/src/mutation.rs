// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rule mutations and their validation

use munchkin_storage::{Action, WalEntry};
use thiserror::Error;

/// Older nodes wrote a single marker byte as the pattern of a delete
const LEGACY_DELETE_PATTERN_MAX: usize = 1;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("key must not be empty")]
    EmptyKey,
    #[error("pattern must not be empty")]
    EmptyPattern,
    #[error("delete must not carry a pattern")]
    PatternOnDelete,
    #[error("{0} is not valid UTF-8")]
    NotUtf8(&'static str),
}

/// A change to the installed rule set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Add { key: String, pattern: String },
    Delete { key: String },
}

impl Mutation {
    pub fn add(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Mutation::Add {
            key: key.into(),
            pattern: pattern.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Mutation::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            Mutation::Add { key, .. } | Mutation::Delete { key } => key,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Mutation::Add { .. } => Action::Add,
            Mutation::Delete { .. } => Action::Delete,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key().is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        if let Mutation::Add { pattern, .. } = self {
            if pattern.is_empty() {
                return Err(ValidationError::EmptyPattern);
            }
        }
        Ok(())
    }

    /// The WAL record for this mutation at `timestamp`
    pub fn to_entry(&self, timestamp: u64) -> WalEntry {
        match self {
            Mutation::Add { key, pattern } => {
                WalEntry::add(timestamp, key.as_bytes(), pattern.as_bytes())
            }
            Mutation::Delete { key } => WalEntry::delete(timestamp, key.as_bytes()),
        }
    }

    /// Decode and validate a mutation carried by a WAL record
    pub fn from_entry(entry: &WalEntry) -> Result<Self, ValidationError> {
        let key = String::from_utf8(entry.key.clone()).map_err(|_| ValidationError::NotUtf8("key"))?;
        let mutation = match entry.action {
            Action::Add => {
                let pattern = String::from_utf8(entry.pattern.clone())
                    .map_err(|_| ValidationError::NotUtf8("pattern"))?;
                Mutation::Add { key, pattern }
            }
            Action::Delete => {
                if entry.pattern.len() > LEGACY_DELETE_PATTERN_MAX {
                    return Err(ValidationError::PatternOnDelete);
                }
                Mutation::Delete { key }
            }
        };
        mutation.validate()?;
        Ok(mutation)
    }
}

#[cfg(test)]
#[path = "mutation_tests.rs"]
mod tests;
