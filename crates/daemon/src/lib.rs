// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Munchkin node: HTTP APIs, replication and lifecycle around the core pipeline

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod cluster;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod protocol;
pub mod replication;

#[cfg(test)]
mod testing;

pub use client::{ReplicationClient, ReplicationError};
pub use cluster::{MembershipEvent, MembershipHandler, Peer, Replicator, StaticMembership};
pub use config::{Args, Config, ConfigError};
pub use lifecycle::{startup, LifecycleError, Node, NodePipeline};
pub use protocol::{ProtocolError, Request, Response};
pub use replication::{InboundApplier, ReplicationServer, WalHistory};
