// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable mutation timestamps

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A clock that provides wall-clock nanoseconds since the Unix epoch
pub trait Clock: Clone + Send + Sync + 'static {
    fn now_nanos(&self) -> u64;
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        munchkin_storage::unix_nanos()
    }
}

/// Fake clock for testing with controllable time
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<u64>>,
}

impl FakeClock {
    pub fn new(start_nanos: u64) -> Self {
        Self {
            current: Arc::new(Mutex::new(start_nanos)),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = current.saturating_add(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Set the clock to a specific timestamp, including moving it backwards
    pub fn set(&self, nanos: u64) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = nanos;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl Clock for FakeClock {
    fn now_nanos(&self) -> u64 {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
