// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node lifecycle management: startup, recovery, shutdown.

use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use munchkin_core::{
    recover, ExactMatcher, Journal, MatcherPool, MutationPipeline, PoolConfig, PoolError,
    RecoveryError, RecoveryReport, SystemClock, Watermark,
};
use munchkin_storage::{WalError, WalFileManager, WalManagerConfig};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cluster::{Replicator, StaticMembership};
use crate::config::Config;
use crate::http::{self, ApiState};
use crate::protocol::DEFAULT_TIMEOUT;
use crate::replication::{InboundApplier, ReplicationServer, WalHistory};

/// Pipeline with the concrete engine the node runs
pub type NodePipeline = MutationPipeline<ExactMatcher, SystemClock>;

/// Name of the lock file kept in the WAL directory
pub const LOCK_FILE: &str = "munchkin.lock";

/// How long shutdown waits for in-flight HTTP requests
const HTTP_DRAIN: Duration = Duration::from_secs(5);

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to acquire lock: node already running on this WAL directory?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    #[error("Recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Matcher pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A running node
pub struct Node {
    config: Config,
    // Held to keep the exclusive lock; released on drop
    lock: Option<(PathBuf, File)>,
    pipeline: Arc<NodePipeline>,
    recovery: Option<RecoveryReport>,
    match_addr: SocketAddr,
    admin_addr: SocketAddr,
    replication_addr: SocketAddr,
    stop_http: watch::Sender<bool>,
    http: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    start_time: Instant,
}

impl Node {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<NodePipeline> {
        &self.pipeline
    }

    /// Replay summary, `None` when nothing was loaded
    pub fn recovery(&self) -> Option<&RecoveryReport> {
        self.recovery.as_ref()
    }

    pub fn match_addr(&self) -> SocketAddr {
        self.match_addr
    }

    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    pub fn replication_addr(&self) -> SocketAddr {
        self.replication_addr
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Shutdown the node gracefully
    pub async fn shutdown(mut self) -> Result<(), LifecycleError> {
        info!("Shutting down node...");

        // 1. Stop accepting HTTP requests and let in-flight ones finish
        let _ = self.stop_http.send(true);
        for handle in self.http.drain(..) {
            if tokio::time::timeout(HTTP_DRAIN, handle).await.is_err() {
                warn!("HTTP server did not drain in time");
            }
        }

        // 2. Stop replication and membership
        for handle in self.background.drain(..) {
            handle.abort();
        }

        // 3. Flush queued entries and close the active WAL file
        if let Some(journal) = self.pipeline.journal() {
            journal.close().await?;
        }

        // 4. Remove the lock file; the lock itself goes with the handle
        if let Some((path, file)) = self.lock.take() {
            drop(file);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove lock file: {}", e);
            }
        }

        info!(uptime_ms = self.uptime().as_millis() as u64, "Node shutdown complete");
        Ok(())
    }
}

/// Start the node
pub async fn startup(config: &Config) -> Result<Node, LifecycleError> {
    // Lock first so a second node on the same WAL directory fails fast
    let lock = match &config.wal_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Some(acquire_lock(dir.join(LOCK_FILE))?)
        }
        None => None,
    };

    match startup_inner(config, lock).await {
        Ok(node) => Ok(node),
        Err(e) => {
            cleanup_on_failure(config);
            Err(e)
        }
    }
}

fn acquire_lock(path: PathBuf) -> Result<(PathBuf, File), LifecycleError> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)?;
    file.try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok((path, file))
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(
    config: &Config,
    lock: Option<(PathBuf, File)>,
) -> Result<Node, LifecycleError> {
    // 1. Rebuild the base engine from WAL files before any replica exists
    let mut base = ExactMatcher::new();
    let watermark = Watermark::default();
    let recovery = match &config.wal_load_dir {
        Some(dir) => {
            let report = recover(&mut base, dir, &config.wal_load_prefix, &watermark)?;
            info!(
                dir = %dir.display(),
                files = report.files,
                applied = report.applied,
                skipped = report.skipped,
                failed = report.failed,
                watermark = report.watermark,
                "Recovered rules from WAL"
            );
            Some(report)
        }
        None => None,
    };

    // 2. Replicas, journal, pipeline
    let pool = MatcherPool::new(
        &base,
        PoolConfig {
            size: config.pool_size,
            checkout_timeout: config.checkout_timeout,
        },
    )?;
    drop(base);

    let journal = match &config.wal_dir {
        Some(dir) => {
            let manager = WalFileManager::new(WalManagerConfig {
                dir: dir.clone(),
                prefix: config.wal_prefix.clone(),
                max_entries_per_file: config.wal_max_entries,
            })?;
            Some(Journal::spawn(Arc::new(manager)))
        }
        None => {
            warn!("No WAL directory configured, mutations will not survive a restart");
            None
        }
    };
    let pipeline = Arc::new(MutationPipeline::new(pool, journal, watermark, SystemClock));

    // 3. Bind every listener before spawning anything
    let match_listener = bind_std(SocketAddr::new(config.bind, config.match_api_port))?;
    let admin_listener = bind_std(SocketAddr::new(config.bind, config.admin_api_port))?;
    let replication_target = SocketAddr::new(config.bind, config.replication_port);
    let replication_listener = tokio::net::TcpListener::bind(replication_target)
        .await
        .map_err(|e| LifecycleError::BindFailed(replication_target, e))?;

    let match_addr = match_listener.local_addr()?;
    let admin_addr = admin_listener.local_addr()?;
    let replication_addr = replication_listener.local_addr()?;

    // 4. Replication server
    let inbound = Arc::new(InboundApplier::new(Arc::clone(&pipeline)));
    let history = config.wal_dir.as_ref().map(|dir| WalHistory {
        dir: dir.clone(),
        prefix: config.wal_prefix.clone(),
    });
    let server = Arc::new(ReplicationServer::new(Arc::clone(&inbound), history.clone()));
    let mut background = vec![tokio::spawn(server.serve(replication_listener))];

    // 5. HTTP servers
    let api = Arc::new(ApiState {
        pipeline: Arc::clone(&pipeline),
        submit_wait: config.submit_wait,
    });
    let (stop_http, stopped) = watch::channel(false);
    let http = vec![
        spawn_http("match", match_listener, http::match_router(Arc::clone(&api)), stopped.clone()),
        spawn_http("admin", admin_listener, http::admin_router(api), stopped),
    ];

    // 6. Probe for membership changes; live peers get a forwarder each
    let replicator = Arc::new(Replicator::new(inbound, history, DEFAULT_TIMEOUT));
    let membership = StaticMembership::new(config.peers.clone(), config.probe_interval);
    background.push(tokio::spawn(membership.run(replicator)));

    info!(
        node = %config.node_name,
        %match_addr,
        %admin_addr,
        %replication_addr,
        peers = config.peers.len(),
        pool_size = config.pool_size,
        "Node started"
    );

    Ok(Node {
        config: config.clone(),
        lock,
        pipeline,
        recovery,
        match_addr,
        admin_addr,
        replication_addr,
        stop_http,
        http,
        background,
        start_time: Instant::now(),
    })
}

fn bind_std(addr: SocketAddr) -> Result<std::net::TcpListener, LifecycleError> {
    let listener =
        std::net::TcpListener::bind(addr).map_err(|e| LifecycleError::BindFailed(addr, e))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn spawn_http(
    name: &'static str,
    listener: std::net::TcpListener,
    router: axum::Router,
    mut stopped: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = stopped.wait_for(|stop| *stop).await;
        };
        if let Err(e) = http::serve(listener, router, shutdown).await {
            error!(server = name, error = %e, "HTTP server failed");
        }
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if let Some(dir) = &config.wal_dir {
        let _ = std::fs::remove_file(dir.join(LOCK_FILE));
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
