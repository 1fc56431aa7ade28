// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for daemon unit tests

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use munchkin_core::{
    ExactMatcher, Journal, MatcherPool, MutationPipeline, PoolConfig, SystemClock, Watermark,
};
use munchkin_storage::{WalFileManager, WalManagerConfig};
use tokio::net::TcpListener;

use crate::replication::{InboundApplier, ReplicationServer, WalHistory};

pub type TestPipeline = MutationPipeline<ExactMatcher, SystemClock>;

pub const PREFIX: &str = "mwal-";

/// Single-replica pipeline, journaling into `wal_dir` when given
pub fn pipeline(wal_dir: Option<&Path>, max_entries_per_file: u64) -> Arc<TestPipeline> {
    let pool = MatcherPool::new(
        &ExactMatcher::new(),
        PoolConfig {
            size: 1,
            checkout_timeout: Some(Duration::from_secs(5)),
        },
    )
    .unwrap();
    let journal = wal_dir.map(|dir| {
        let manager = WalFileManager::new(WalManagerConfig {
            dir: dir.to_path_buf(),
            prefix: PREFIX.to_string(),
            max_entries_per_file,
        })
        .unwrap();
        Journal::spawn(Arc::new(manager))
    });
    Arc::new(MutationPipeline::new(
        pool,
        journal,
        Watermark::default(),
        SystemClock,
    ))
}

/// Serve replication for `pipeline` on an ephemeral local port
pub async fn spawn_replication(
    pipeline: Arc<TestPipeline>,
    history_dir: Option<&Path>,
) -> SocketAddr {
    let history = history_dir.map(|dir| WalHistory {
        dir: dir.to_path_buf(),
        prefix: PREFIX.to_string(),
    });
    let inbound = Arc::new(InboundApplier::new(pipeline));
    let server = Arc::new(ReplicationServer::new(inbound, history));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    addr
}

/// Poll `check` until it holds or a couple of seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
