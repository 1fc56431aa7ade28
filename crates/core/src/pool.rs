// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded pool of matcher replicas
//!
//! Each replica is handed to exactly one caller at a time. Waiters are
//! served in FIFO order by the underlying semaphore. The pool owns its
//! replicas for its whole lifetime and never grows or shrinks.

use crate::matcher::Matcher;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{
    Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Semaphore, SemaphorePermit,
};

/// Default bound on how long a checkout waits for a free replica
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("matcher pool size must be at least 1")]
    ZeroCapacity,
    #[error("no matcher replica became available within {0:?}")]
    Exhausted(Duration),
    #[error("matcher pool is closed")]
    Closed,
}

/// Pool sizing and wait policy
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    /// `None` waits indefinitely
    pub checkout_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 8,
            checkout_timeout: Some(DEFAULT_CHECKOUT_TIMEOUT),
        }
    }
}

pub struct MatcherPool<M> {
    slots: Vec<AsyncMutex<M>>,
    /// Indexes of slots not currently checked out
    free: Mutex<Vec<usize>>,
    permits: Semaphore,
    capacity: usize,
    checkout_timeout: Option<Duration>,
}

impl<M: Matcher> MatcherPool<M> {
    /// Build a pool of `config.size` independent copies of `base`
    pub fn new(base: &M, config: PoolConfig) -> Result<Self, PoolError> {
        if config.size == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        let slots = (0..config.size).map(|_| AsyncMutex::new(base.copy())).collect();
        Ok(Self {
            slots,
            free: Mutex::new((0..config.size).collect()),
            permits: Semaphore::new(config.size),
            capacity: config.size,
            checkout_timeout: config.checkout_timeout,
        })
    }

    /// Borrow a replica, waiting in line if all are in use
    pub async fn checkout(&self) -> Result<PooledMatcher<'_, M>, PoolError> {
        let permit = match self.checkout_timeout {
            Some(limit) => tokio::time::timeout(limit, self.permits.acquire())
                .await
                .map_err(|_| PoolError::Exhausted(limit))?,
            None => self.permits.acquire().await,
        }
        .map_err(|_| PoolError::Closed)?;
        self.take(permit)
    }

    /// Borrow a replica only if one is free right now
    pub fn try_checkout(&self) -> Option<PooledMatcher<'_, M>> {
        let permit = self.permits.try_acquire().ok()?;
        self.take(permit).ok()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replicas not currently checked out
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    fn take<'a>(&'a self, permit: SemaphorePermit<'a>) -> Result<PooledMatcher<'a, M>, PoolError> {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        // A permit always corresponds to a free slot whose lock is uncontended.
        let index = free.pop().ok_or(PoolError::Closed)?;
        match self.slots.get(index).and_then(|slot| slot.try_lock().ok()) {
            Some(replica) => Ok(PooledMatcher {
                pool: self,
                index,
                replica,
                _permit: permit,
            }),
            None => {
                free.push(index);
                Err(PoolError::Closed)
            }
        }
    }
}

/// A checked-out replica; returned to the pool on drop
pub struct PooledMatcher<'a, M> {
    pool: &'a MatcherPool<M>,
    index: usize,
    replica: AsyncMutexGuard<'a, M>,
    _permit: SemaphorePermit<'a>,
}

impl<M> Deref for PooledMatcher<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.replica
    }
}

impl<M> DerefMut for PooledMatcher<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.replica
    }
}

impl<M> Drop for PooledMatcher<'_, M> {
    fn drop(&mut self) {
        // The slot unlocks and the permit is released by field drop, after
        // the index is back on the free list.
        self.pool
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.index);
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
