// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Matching engine capability
//!
//! Any engine offering these four operations can back the node. The
//! built-in engine is [`ExactMatcher`].

mod exact;

pub use exact::ExactMatcher;

use thiserror::Error;

/// Errors reported by a matching engine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatcherError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

/// A rule-matching engine holding named patterns.
///
/// Implementations are not required to be safe for concurrent use; the
/// pool hands out each replica to one caller at a time.
pub trait Matcher: Send + Sync + 'static {
    /// Register `pattern` under `id`. Adding again under the same id keeps
    /// both patterns; an event matching either reports `id`.
    fn add_pattern(&mut self, id: &str, pattern: &str) -> Result<(), MatcherError>;

    /// Remove every pattern registered under `id`. Removing an unknown id
    /// is not an error.
    fn delete_patterns(&mut self, id: &str) -> Result<(), MatcherError>;

    /// Ids of all patterns the event satisfies
    fn matches_for_event(&self, event: &[u8]) -> Result<Vec<String>, MatcherError>;

    /// Independent replica with the same patterns
    fn copy(&self) -> Self
    where
        Self: Sized;
}
