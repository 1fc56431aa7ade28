// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster membership and peer replication
//!
//! Membership changes arrive as [`MembershipEvent`]s and are dispatched to
//! a single [`MembershipHandler`]. The [`Replicator`] is that handler: it
//! pulls history from peers that join and runs one forwarder per live peer,
//! so a slow or silent peer only holds up its own entries.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use munchkin_core::{ApplyOutcome, Clock, Matcher};
use munchkin_storage::WalEntry;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{ApplyStream, ReplicationClient, ReplicationError};
use crate::protocol::Response;
use crate::replication::{history_feed, InboundApplier, WalHistory};

/// A cluster member and its replication address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub name: String,
    pub addr: String,
}

impl Peer {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(Peer),
    Left(Peer),
    Failed(Peer),
    Reaped(Peer),
    /// Membership changed in some way; sent after a batch of changes
    Updated,
}

#[async_trait]
pub trait MembershipHandler: Send + Sync {
    async fn handle(&self, event: MembershipEvent);
}

/// Membership over a fixed peer list, driven by periodic pings
pub struct StaticMembership {
    peers: Vec<Peer>,
    probe_interval: Duration,
    probe_timeout: Duration,
    up: HashSet<String>,
}

impl StaticMembership {
    pub fn new(peers: Vec<Peer>, probe_interval: Duration) -> Self {
        let probe_interval = probe_interval.max(Duration::from_millis(1));
        Self {
            peers,
            probe_interval,
            probe_timeout: probe_interval.min(Duration::from_secs(2)),
            up: HashSet::new(),
        }
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    /// Ping every peer once and report state changes
    pub async fn probe_round(&mut self) -> Vec<MembershipEvent> {
        let mut events = Vec::new();
        for peer in &self.peers {
            let alive = ReplicationClient::new(peer.addr.clone())
                .with_timeout(self.probe_timeout)
                .ping()
                .await
                .is_ok();
            let was_up = self.up.contains(&peer.name);
            if alive && !was_up {
                self.up.insert(peer.name.clone());
                events.push(MembershipEvent::Joined(peer.clone()));
            } else if !alive && was_up {
                self.up.remove(&peer.name);
                events.push(MembershipEvent::Failed(peer.clone()));
            }
        }
        if !events.is_empty() {
            events.push(MembershipEvent::Updated);
        }
        events
    }

    /// Probe forever, dispatching every change to `handler`
    pub async fn run<H: MembershipHandler + ?Sized>(mut self, handler: Arc<H>) {
        if self.peers.is_empty() {
            debug!("no peers configured");
            return;
        }
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for event in self.probe_round().await {
                handler.handle(event).await;
            }
        }
    }
}

/// Result of pulling history from one peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUp {
    pub received: u64,
    pub applied: u64,
    pub rejected: u64,
}

/// Pull every entry `peer` logged after our watermark and apply it
pub async fn catch_up<M: Matcher, C: Clock>(
    inbound: &InboundApplier<M, C>,
    peer: &Peer,
    timeout: Duration,
) -> Result<CatchUp, ReplicationError> {
    let since = inbound.pipeline().watermark();
    let mut stream = ReplicationClient::new(peer.addr.clone())
        .with_timeout(timeout)
        .stream_from(since)
        .await?;

    let mut report = CatchUp::default();
    while let Some((source_file, entry)) = stream.next().await? {
        report.received += 1;
        match inbound.apply(&entry).await {
            Ok(ApplyOutcome::Applied { .. }) => report.applied += 1,
            Ok(ApplyOutcome::Stale) => {}
            Err(e) => {
                warn!(
                    peer = %peer.name,
                    source_file = %source_file,
                    key = %entry.key_str(),
                    error = %e,
                    "rejected entry from peer"
                );
                report.rejected += 1;
            }
        }
    }
    Ok(report)
}

/// Forwarding task for one live peer
struct PeerLink {
    peer: Peer,
    forwarder: JoinHandle<()>,
}

pub struct Replicator<M, C> {
    inbound: Arc<InboundApplier<M, C>>,
    /// Local WAL, used to resend entries a peer missed
    history: Option<WalHistory>,
    links: Mutex<BTreeMap<String, PeerLink>>,
    timeout: Duration,
}

impl<M: Matcher, C: Clock> Replicator<M, C> {
    pub fn new(
        inbound: Arc<InboundApplier<M, C>>,
        history: Option<WalHistory>,
        timeout: Duration,
    ) -> Self {
        Self {
            inbound,
            history,
            links: Mutex::new(BTreeMap::new()),
            timeout,
        }
    }

    pub fn live_peers(&self) -> Vec<Peer> {
        let links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        links.values().map(|link| link.peer.clone()).collect()
    }

    /// Start forwarding local entries to `peer` unless already doing so
    fn link(&self, peer: &Peer) {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        if links
            .get(&peer.name)
            .is_some_and(|link| !link.forwarder.is_finished())
        {
            return;
        }
        let pipeline = self.inbound.pipeline();
        let feed = pipeline.subscribe_local();
        let forwarder = PeerForwarder {
            peer: peer.clone(),
            inbound: Arc::clone(&self.inbound),
            history: self.history.clone(),
            timeout: self.timeout,
            stream: None,
            // Anything older is pulled by the peer when it sees us.
            last_sent: pipeline.watermark(),
            behind: false,
        };
        let link = PeerLink {
            peer: peer.clone(),
            forwarder: tokio::spawn(forwarder.run(feed)),
        };
        if let Some(stale) = links.insert(peer.name.clone(), link) {
            stale.forwarder.abort();
        }
    }

    fn mark_down(&self, peer: &Peer) -> bool {
        let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        match links.remove(&peer.name) {
            Some(link) => {
                link.forwarder.abort();
                true
            }
            None => false,
        }
    }
}

impl<M, C> Drop for Replicator<M, C> {
    fn drop(&mut self) {
        let links = self.links.get_mut().unwrap_or_else(|e| e.into_inner());
        for link in links.values() {
            link.forwarder.abort();
        }
    }
}

#[async_trait]
impl<M: Matcher, C: Clock> MembershipHandler for Replicator<M, C> {
    async fn handle(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::Joined(peer) => {
                info!(peer = %peer.name, addr = %peer.addr, "peer joined");
                self.link(&peer);
                let inbound = Arc::clone(&self.inbound);
                let timeout = self.timeout;
                tokio::spawn(async move {
                    match catch_up(&inbound, &peer, timeout).await {
                        Ok(report) => info!(
                            peer = %peer.name,
                            received = report.received,
                            applied = report.applied,
                            rejected = report.rejected,
                            "caught up from peer"
                        ),
                        Err(e) => warn!(peer = %peer.name, error = %e, "catch-up from peer failed"),
                    }
                });
            }
            MembershipEvent::Left(peer) | MembershipEvent::Reaped(peer) => {
                if self.mark_down(&peer) {
                    info!(peer = %peer.name, "peer left");
                }
            }
            MembershipEvent::Failed(peer) => {
                if self.mark_down(&peer) {
                    warn!(peer = %peer.name, addr = %peer.addr, "peer failed");
                }
            }
            MembershipEvent::Updated => {
                debug!(live = self.live_peers().len(), "membership updated");
            }
        }
    }
}

/// Sends locally-originated entries to one peer, in timestamp order
///
/// Entries go out over a long-lived apply stream as they are broadcast.
/// When the feed lags or a send fails, live forwarding pauses and the
/// forwarder resends everything after the last acknowledged timestamp
/// from the local WAL and journal before carrying on.
struct PeerForwarder<M, C> {
    peer: Peer,
    inbound: Arc<InboundApplier<M, C>>,
    history: Option<WalHistory>,
    timeout: Duration,
    stream: Option<ApplyStream>,
    /// Newest timestamp the peer has answered for
    last_sent: u64,
    /// Entries after `last_sent` may have been missed
    behind: bool,
}

impl<M: Matcher, C: Clock> PeerForwarder<M, C> {
    async fn run(mut self, mut feed: broadcast::Receiver<WalEntry>) {
        loop {
            if self.behind {
                match self.resync().await {
                    Ok(sent) => {
                        self.behind = false;
                        info!(peer = %self.peer.name, sent, last_sent = self.last_sent, "resent missed entries");
                    }
                    Err(e) => warn!(peer = %self.peer.name, error = %e, "resending missed entries failed"),
                }
            }

            let entry = match feed.recv().await {
                Ok(entry) => entry,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(peer = %self.peer.name, skipped, "forwarding fell behind, resending from history");
                    self.behind = true;
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            // While behind, the next resync covers this entry.
            if self.behind || entry.timestamp <= self.last_sent {
                continue;
            }
            if let Err(e) = self.deliver(&entry).await {
                warn!(
                    peer = %self.peer.name,
                    timestamp = entry.timestamp,
                    error = %e,
                    "failed to forward entry"
                );
                self.behind = true;
            }
        }
        debug!(peer = %self.peer.name, "local entry feed closed");
    }

    /// Send everything after `last_sent` from the WAL and journal
    async fn resync(&mut self) -> Result<u64, ReplicationError> {
        // Snapshot before reading files, as for a history stream.
        let pending = self
            .inbound
            .pipeline()
            .journal()
            .map(|journal| journal.unflushed())
            .unwrap_or_default();
        let mut history = history_feed(self.history.clone(), pending, self.last_sent);

        let mut sent = 0u64;
        while let Some(response) = history.recv().await {
            let entry = match response {
                Response::Entry { entry, .. } => entry,
                Response::Error { message } => return Err(ReplicationError::History(message)),
                other => return Err(ReplicationError::UnexpectedResponse(format!("{:?}", other))),
            };
            if entry.timestamp <= self.last_sent {
                continue;
            }
            self.deliver(&entry).await?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Send one entry; a rejection by the peer still counts as answered
    async fn deliver(&mut self, entry: &WalEntry) -> Result<(), ReplicationError> {
        match self.send(entry).await {
            Ok(0) => debug!(peer = %self.peer.name, timestamp = entry.timestamp, "peer already had entry"),
            Ok(_) => {}
            Err(ReplicationError::Remote(message)) => warn!(
                peer = %self.peer.name,
                timestamp = entry.timestamp,
                error = %message,
                "peer rejected entry"
            ),
            Err(e) => return Err(e),
        }
        self.last_sent = entry.timestamp;
        Ok(())
    }

    async fn send(&mut self, entry: &WalEntry) -> Result<u64, ReplicationError> {
        if let Some(stream) = self.stream.as_mut() {
            match stream.send(entry).await {
                Err(ReplicationError::Remote(message)) => {
                    return Err(ReplicationError::Remote(message))
                }
                Err(e) => {
                    debug!(peer = %self.peer.name, error = %e, "apply stream broke, reconnecting");
                    self.stream = None;
                }
                ack => return ack,
            }
        }

        let mut stream = ReplicationClient::new(self.peer.addr.clone())
            .with_timeout(self.timeout)
            .apply_stream()
            .await?;
        let ack = stream.send(entry).await;
        if matches!(ack, Ok(_) | Err(ReplicationError::Remote(_))) {
            self.stream = Some(stream);
        }
        ack
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
