// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mutation pipeline
//!
//! Ties the matcher pool, the journal and the node watermark together.
//! Every rule change, whether local, replicated or replayed, goes through
//! one of the apply paths here:
//!
//! ```text
//! write lock → stamp → checkout replica → add/delete → journal → advance watermark → broadcast
//! ```
//!
//! Writes are serialized so the journal, the watermark and the local feed
//! all see entries in timestamp order. Matching is not affected by the
//! write lock.

use crate::clock::{Clock, SystemClock};
use crate::journal::Journal;
use crate::matcher::{Matcher, MatcherError};
use crate::mutation::{Mutation, ValidationError};
use crate::pool::{MatcherPool, PoolError};
use crate::watermark::Watermark;
use munchkin_storage::WalEntry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, Mutex};

/// How long [`MutationPipeline::submit`] waits before answering "accepted"
pub const DEFAULT_SUBMIT_WAIT: Duration = Duration::from_secs(30);

const LOCAL_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("matching engine error: {0}")]
    Matcher(#[from] MatcherError),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("mutation task ended without reporting an outcome")]
    TaskLost,
}

/// Outcome of a bounded-wait submission
#[derive(Debug)]
pub enum Submission {
    Completed { timestamp: u64 },
    Failed(PipelineError),
    /// Still running in the background when the wait ran out
    Accepted,
}

/// Outcome of applying a replicated entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Applied; carries the local application time
    Applied { timestamp: u64 },
    /// At or below the watermark; nothing changed
    Stale,
}

impl ApplyOutcome {
    /// Wire acknowledgement: application time, or 0 for a stale entry
    pub fn ack(self) -> u64 {
        match self {
            ApplyOutcome::Applied { timestamp } => timestamp,
            ApplyOutcome::Stale => 0,
        }
    }
}

pub struct MutationPipeline<M, C = SystemClock> {
    pool: MatcherPool<M>,
    journal: Option<Journal>,
    watermark: Watermark,
    /// Last timestamp handed to a local mutation
    issued: AtomicU64,
    clock: C,
    local_tx: broadcast::Sender<WalEntry>,
    /// Held from stamping until the entry is broadcast
    write_order: Mutex<()>,
}

impl<M: Matcher, C: Clock> MutationPipeline<M, C> {
    /// `journal` is `None` when durability is disabled. `watermark` is
    /// usually the one left behind by recovery.
    pub fn new(pool: MatcherPool<M>, journal: Option<Journal>, watermark: Watermark, clock: C) -> Self {
        let (local_tx, _) = broadcast::channel(LOCAL_FEED_CAPACITY);
        Self {
            pool,
            journal,
            watermark,
            issued: AtomicU64::new(0),
            clock,
            local_tx,
            write_order: Mutex::new(()),
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark.get()
    }

    pub fn pool(&self) -> &MatcherPool<M> {
        &self.pool
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// Entries produced by local mutations, after they are applied
    pub fn subscribe_local(&self) -> broadcast::Receiver<WalEntry> {
        self.local_tx.subscribe()
    }

    pub async fn add_rule(&self, key: &str, pattern: &str) -> Result<u64, PipelineError> {
        self.apply(Mutation::add(key, pattern)).await
    }

    pub async fn delete_rule(&self, key: &str) -> Result<u64, PipelineError> {
        self.apply(Mutation::delete(key)).await
    }

    /// Removing a single pattern from a key is not supported
    pub async fn delete_pattern(&self, key: &str, _pattern: &str) -> Result<u64, PipelineError> {
        tracing::debug!(key, "delete_pattern requested");
        Err(PipelineError::NotImplemented("deleting one pattern of a key"))
    }

    /// Apply a local mutation and return the timestamp it was stamped with
    pub async fn apply(&self, mutation: Mutation) -> Result<u64, PipelineError> {
        mutation.validate()?;
        let _order = self.write_order.lock().await;
        let timestamp = self.next_timestamp();

        self.apply_to_replica(&mutation).await?;

        let entry = mutation.to_entry(timestamp);
        if let Some(journal) = &self.journal {
            journal.append(entry.clone());
        }
        self.watermark.advance(timestamp);
        tracing::debug!(key = mutation.key(), action = ?mutation.action(), timestamp, "applied mutation");

        // No subscribers is fine.
        let _ = self.local_tx.send(entry);
        Ok(timestamp)
    }

    /// Apply an entry that originated on a peer, keeping its timestamp
    pub async fn apply_entry(&self, entry: &WalEntry) -> Result<ApplyOutcome, PipelineError> {
        let _order = self.write_order.lock().await;
        if self.watermark.is_stale(entry.timestamp) {
            tracing::debug!(
                timestamp = entry.timestamp,
                watermark = self.watermark.get(),
                key = %entry.key_str(),
                "ignoring stale entry"
            );
            return Ok(ApplyOutcome::Stale);
        }

        let mutation = Mutation::from_entry(entry)?;
        self.apply_to_replica(&mutation).await?;

        if let Some(journal) = &self.journal {
            journal.append(entry.clone());
        }
        self.watermark.advance(entry.timestamp);
        tracing::debug!(key = mutation.key(), timestamp = entry.timestamp, "applied replicated entry");

        Ok(ApplyOutcome::Applied {
            timestamp: self.clock.now_nanos(),
        })
    }

    /// Run `mutation` in the background and wait up to `wait` for it.
    ///
    /// The background task is never cancelled. If the caller has stopped
    /// waiting, the task logs the outcome itself.
    pub async fn submit(self: &Arc<Self>, mutation: Mutation, wait: Duration) -> Submission {
        if let Err(e) = mutation.validate() {
            return Submission::Failed(e.into());
        }

        let (tx, rx) = oneshot::channel();
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let key = mutation.key().to_string();
            let result = pipeline.apply(mutation).await;
            if let Err(unclaimed) = tx.send(result) {
                match unclaimed {
                    Ok(timestamp) => {
                        tracing::info!(key = %key, timestamp, "background mutation completed")
                    }
                    Err(e) => tracing::error!(key = %key, error = %e, "background mutation failed"),
                }
            }
        });

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(Ok(timestamp))) => Submission::Completed { timestamp },
            Ok(Ok(Err(e))) => Submission::Failed(e),
            Ok(Err(_)) => Submission::Failed(PipelineError::TaskLost),
            Err(_) => Submission::Accepted,
        }
    }

    /// Match an event against whichever replica is free
    pub async fn match_event(&self, event: &[u8]) -> Result<Vec<String>, PipelineError> {
        let replica = self.pool.checkout().await?;
        Ok(replica.matches_for_event(event)?)
    }

    async fn apply_to_replica(&self, mutation: &Mutation) -> Result<(), PipelineError> {
        let mut replica = self.pool.checkout().await?;
        match mutation {
            Mutation::Add { key, pattern } => replica.add_pattern(key, pattern)?,
            Mutation::Delete { key } => replica.delete_patterns(key)?,
        }
        Ok(())
    }

    /// `max(now, previous + 1)` over both issued and applied timestamps
    fn next_timestamp(&self) -> u64 {
        let now = self.clock.now_nanos();
        let floor = self.watermark.get();
        let next = |last: u64| now.max(last.max(floor).saturating_add(1));
        match self
            .issued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(next(last)))
        {
            Ok(last) | Err(last) => next(last),
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
