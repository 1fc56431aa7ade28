// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node configuration
//!
//! Precedence, highest first: command-line flags, `MUNCHKIN_*` environment
//! variables, the TOML file named by `--config`, built-in defaults.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use munchkin_core::{DEFAULT_CHECKOUT_TIMEOUT, DEFAULT_SUBMIT_WAIT};
use serde::Deserialize;
use thiserror::Error;

use crate::cluster::Peer;

pub const DEFAULT_PREFIX: &str = "mwal-";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid peer {0:?}, expected ADDR or NAME=ADDR")]
    Peer(String),

    #[error("pool size must be at least 1")]
    PoolSize,

    #[error("probe interval must be at least 1ms")]
    ProbeInterval,
}

/// Command-line flags
#[derive(Debug, Default, Parser)]
#[command(name = "munchkind", version, about = "Rule-matching node with a replicated write-ahead log")]
pub struct Args {
    /// TOML configuration file
    #[arg(long, env = "MUNCHKIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name this node reports to peers
    #[arg(long, env = "MUNCHKIN_NODE_NAME")]
    pub node_name: Option<String>,

    /// Number of matcher replicas
    #[arg(long, env = "MUNCHKIN_POOL_SIZE")]
    pub pool_size: Option<usize>,

    /// Longest wait for a free replica, in milliseconds (0 waits forever)
    #[arg(long, env = "MUNCHKIN_CHECKOUT_TIMEOUT_MS")]
    pub checkout_timeout_ms: Option<u64>,

    /// Longest wait for an add/delete before answering 202, in milliseconds
    #[arg(long, env = "MUNCHKIN_SUBMIT_WAIT_MS")]
    pub submit_wait_ms: Option<u64>,

    /// Directory to replay WAL files from at startup (defaults to --wal-dir)
    #[arg(long, env = "MUNCHKIN_WAL_LOAD_DIR")]
    pub wal_load_dir: Option<PathBuf>,

    /// Prefix of WAL files to replay
    #[arg(long, env = "MUNCHKIN_WAL_LOAD_PREFIX")]
    pub wal_load_prefix: Option<String>,

    /// Directory to write WAL files to; no WAL is kept when unset
    #[arg(long, env = "MUNCHKIN_WAL_DIR")]
    pub wal_dir: Option<PathBuf>,

    /// Prefix of WAL files written by this node
    #[arg(long, env = "MUNCHKIN_WAL_PREFIX")]
    pub wal_prefix: Option<String>,

    /// Entries per WAL file before rotating
    #[arg(long, env = "MUNCHKIN_WAL_MAX_ENTRIES")]
    pub wal_max_entries: Option<u64>,

    /// Address all listeners bind to
    #[arg(long, env = "MUNCHKIN_BIND")]
    pub bind: Option<IpAddr>,

    /// Match API port (0 picks a free port)
    #[arg(long, env = "MUNCHKIN_MATCH_API_PORT")]
    pub match_api_port: Option<u16>,

    /// Admin API port (0 picks a free port)
    #[arg(long, env = "MUNCHKIN_ADMIN_API_PORT")]
    pub admin_api_port: Option<u16>,

    /// Replication port (0 picks a free port)
    #[arg(long, env = "MUNCHKIN_REPLICATION_PORT")]
    pub replication_port: Option<u16>,

    /// Peer replication address, as ADDR or NAME=ADDR (repeatable)
    #[arg(long = "peer", env = "MUNCHKIN_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Interval between peer liveness probes, in milliseconds
    #[arg(long, env = "MUNCHKIN_PROBE_INTERVAL_MS")]
    pub probe_interval_ms: Option<u64>,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "MUNCHKIN_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Contents of the TOML file; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub node_name: Option<String>,
    pub pool_size: Option<usize>,
    pub checkout_timeout_ms: Option<u64>,
    pub submit_wait_ms: Option<u64>,
    pub wal_load_dir: Option<PathBuf>,
    pub wal_load_prefix: Option<String>,
    pub wal_dir: Option<PathBuf>,
    pub wal_prefix: Option<String>,
    pub wal_max_entries: Option<u64>,
    pub bind: Option<IpAddr>,
    pub match_api_port: Option<u16>,
    pub admin_api_port: Option<u16>,
    pub replication_port: Option<u16>,
    pub peers: Vec<String>,
    pub probe_interval_ms: Option<u64>,
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved node configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub pool_size: usize,
    /// `None` waits forever
    pub checkout_timeout: Option<Duration>,
    pub submit_wait: Duration,
    /// Replay source; `None` skips recovery
    pub wal_load_dir: Option<PathBuf>,
    pub wal_load_prefix: String,
    /// `None` disables durability
    pub wal_dir: Option<PathBuf>,
    pub wal_prefix: String,
    pub wal_max_entries: u64,
    pub bind: IpAddr,
    pub match_api_port: u16,
    pub admin_api_port: u16,
    pub replication_port: u16,
    pub peers: Vec<Peer>,
    pub probe_interval: Duration,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: format!("munchkin-{}", uuid::Uuid::new_v4().simple()),
            pool_size: 8,
            checkout_timeout: Some(DEFAULT_CHECKOUT_TIMEOUT),
            submit_wait: DEFAULT_SUBMIT_WAIT,
            wal_load_dir: None,
            wal_load_prefix: DEFAULT_PREFIX.to_string(),
            wal_dir: None,
            wal_prefix: DEFAULT_PREFIX.to_string(),
            wal_max_entries: 10_000,
            bind: IpAddr::from([0, 0, 0, 0]),
            match_api_port: 8080,
            admin_api_port: 9090,
            replication_port: 7070,
            peers: Vec::new(),
            probe_interval: Duration::from_secs(5),
            log_file: None,
        }
    }
}

impl Config {
    /// Resolve flags over the optional config file over defaults
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    pub fn resolve(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let checkout_timeout = match args.checkout_timeout_ms.or(file.checkout_timeout_ms) {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.checkout_timeout,
        };
        let wal_dir = args.wal_dir.or(file.wal_dir);
        let wal_load_dir = args
            .wal_load_dir
            .or(file.wal_load_dir)
            .or_else(|| wal_dir.clone());
        let wal_prefix = args
            .wal_prefix
            .or(file.wal_prefix)
            .unwrap_or(defaults.wal_prefix);
        let peer_list = if args.peers.is_empty() {
            file.peers
        } else {
            args.peers
        };
        let peers = peer_list
            .iter()
            .map(|raw| parse_peer(raw))
            .collect::<Result<Vec<_>, _>>()?;

        let config = Config {
            node_name: args
                .node_name
                .or(file.node_name)
                .unwrap_or(defaults.node_name),
            pool_size: args.pool_size.or(file.pool_size).unwrap_or(defaults.pool_size),
            checkout_timeout,
            submit_wait: args
                .submit_wait_ms
                .or(file.submit_wait_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.submit_wait),
            wal_load_dir,
            wal_load_prefix: args
                .wal_load_prefix
                .or(file.wal_load_prefix)
                .unwrap_or_else(|| wal_prefix.clone()),
            wal_dir,
            wal_prefix,
            wal_max_entries: args
                .wal_max_entries
                .or(file.wal_max_entries)
                .unwrap_or(defaults.wal_max_entries),
            bind: args.bind.or(file.bind).unwrap_or(defaults.bind),
            match_api_port: args
                .match_api_port
                .or(file.match_api_port)
                .unwrap_or(defaults.match_api_port),
            admin_api_port: args
                .admin_api_port
                .or(file.admin_api_port)
                .unwrap_or(defaults.admin_api_port),
            replication_port: args
                .replication_port
                .or(file.replication_port)
                .unwrap_or(defaults.replication_port),
            peers,
            probe_interval: args
                .probe_interval_ms
                .or(file.probe_interval_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_interval),
            log_file: args.log_file.or(file.log_file),
        };

        if config.pool_size == 0 {
            return Err(ConfigError::PoolSize);
        }
        if config.probe_interval.is_zero() {
            return Err(ConfigError::ProbeInterval);
        }
        Ok(config)
    }
}

/// `ADDR` or `NAME=ADDR`; a bare address doubles as the name
pub fn parse_peer(raw: &str) -> Result<Peer, ConfigError> {
    let raw = raw.trim();
    let (name, addr) = match raw.split_once('=') {
        Some((name, addr)) => (name.trim(), addr.trim()),
        None => (raw, raw),
    };
    if name.is_empty() || addr.is_empty() || !addr.contains(':') {
        return Err(ConfigError::Peer(raw.to_string()));
    }
    Ok(Peer::new(name, addr))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
