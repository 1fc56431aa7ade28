// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU64, Ordering};

/// Highest mutation timestamp the node has applied. Never decreases.
///
/// Only the apply paths in this crate (local, replicated, replayed) may
/// move it forward.
#[derive(Debug, Default)]
pub struct Watermark(AtomicU64);

impl Watermark {
    pub fn new(timestamp: u64) -> Self {
        Self(AtomicU64::new(timestamp))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// An inbound entry at or below the watermark is a no-op
    pub fn is_stale(&self, timestamp: u64) -> bool {
        timestamp <= self.get()
    }

    /// Raise to `timestamp` if higher; returns the resulting value
    pub(crate) fn advance(&self, timestamp: u64) -> u64 {
        self.0.fetch_max(timestamp, Ordering::AcqRel).max(timestamp)
    }
}

#[cfg(test)]
#[path = "watermark_tests.rs"]
mod tests;
