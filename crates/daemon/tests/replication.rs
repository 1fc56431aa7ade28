// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-node replication over the peer protocol

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use common::{eventually, NodeProcess, MATCHING_EVENT, RULE};

#[test]
fn mutations_reach_the_peer() {
    let a = NodeProcess::start(&[]);
    let peer = format!("a={}", a.replication_addr);
    let b = NodeProcess::start(&["--peer", &peer]);

    // Keep adding until b has seen a and forwards the mutation
    assert!(eventually(|| {
        b.add("from-b", RULE);
        a.matches(MATCHING_EVENT) == vec!["from-b".to_string()]
    }));

    b.delete("from-b");
    assert!(eventually(|| a.matches(MATCHING_EVENT).is_empty()));

    b.stop();
    a.stop();
}

#[test]
fn joining_node_catches_up() {
    let wal = tempfile::tempdir().unwrap();
    let a = NodeProcess::with_wal(wal.path(), &[]);
    a.add("before-join", RULE);

    let peer = format!("a={}", a.replication_addr);
    let b = NodeProcess::start(&["--peer", &peer]);
    assert!(eventually(|| b.matches(MATCHING_EVENT) == vec!["before-join".to_string()]));

    b.stop();
    a.stop();
}
