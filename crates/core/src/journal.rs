// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Asynchronous, order-preserving WAL appender
//!
//! Appends never block the caller. A single writer task drains the queue
//! in order and performs file I/O on the blocking pool. Until an entry is
//! on disk it stays visible through [`Journal::unflushed`], so a history
//! reader that scans files first and the queue second never misses it.

use munchkin_storage::{WalEntry, WalError, WalFileManager};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

#[derive(Default)]
struct Pending {
    entries: VecDeque<WalEntry>,
    appended: u64,
}

pub struct Journal {
    manager: Arc<WalFileManager>,
    pending: Arc<Mutex<Pending>>,
    tx: mpsc::UnboundedSender<WalEntry>,
    written: watch::Receiver<u64>,
}

impl Journal {
    /// Start the writer task. Must be called within a tokio runtime.
    pub fn spawn(manager: Arc<WalFileManager>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (written_tx, written) = watch::channel(0);
        let pending = Arc::new(Mutex::new(Pending::default()));

        tokio::spawn(write_loop(
            Arc::clone(&manager),
            Arc::clone(&pending),
            rx,
            written_tx,
        ));

        Self {
            manager,
            pending,
            tx,
            written,
        }
    }

    /// Queue an entry for durable storage
    pub fn append(&self, entry: WalEntry) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        // Queue order and channel order must agree, so both happen under the lock.
        if let Err(mpsc::error::SendError(entry)) = self.tx.send(entry.clone()) {
            tracing::warn!(
                timestamp = entry.timestamp,
                key = %entry.key_str(),
                "journal writer stopped, entry not persisted"
            );
            return;
        }
        pending.entries.push_back(entry);
        pending.appended += 1;
    }

    /// Entries accepted but not yet written, oldest first
    pub fn unflushed(&self) -> Vec<WalEntry> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.entries.iter().cloned().collect()
    }

    /// Wait until everything appended so far has been written
    pub async fn flush(&self) {
        let target = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .appended;
        let mut written = self.written.clone();
        if written.wait_for(|count| *count >= target).await.is_err() {
            tracing::warn!("journal writer stopped before flush completed");
        }
    }

    /// Flush, then close the active WAL file
    pub async fn close(&self) -> Result<(), WalError> {
        self.flush().await;
        self.manager.close()
    }

    pub fn manager(&self) -> &Arc<WalFileManager> {
        &self.manager
    }
}

async fn write_loop(
    manager: Arc<WalFileManager>,
    pending: Arc<Mutex<Pending>>,
    mut rx: mpsc::UnboundedReceiver<WalEntry>,
    written_tx: watch::Sender<u64>,
) {
    let mut written = 0u64;
    while let Some(entry) = rx.recv().await {
        let manager = Arc::clone(&manager);
        // write_entry logs its own failures
        if let Err(e) = tokio::task::spawn_blocking(move || manager.write_entry(&entry)).await {
            tracing::error!(error = %e, "journal write task failed");
        }
        pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .pop_front();
        written += 1;
        written_tx.send_replace(written);
    }
    tracing::debug!(written, "journal writer stopped");
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
