// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replication server and the serialized inbound apply path.

use std::path::PathBuf;
use std::sync::Arc;

use munchkin_core::{ApplyOutcome, Clock, Matcher, MutationPipeline, PipelineError};
use munchkin_storage::{find_files_on_or_after, WalEntry, WalError, WalFile};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::protocol::{
    self, ProtocolError, Request, Response, DEFAULT_TIMEOUT, PENDING_SOURCE, PROTOCOL_VERSION,
};

/// Entries buffered between the file reader and the socket
const STREAM_BUFFER: usize = 256;

/// Applies entries received from peers, one at a time per node
pub struct InboundApplier<M, C> {
    pipeline: Arc<MutationPipeline<M, C>>,
    lock: Mutex<()>,
}

impl<M: Matcher, C: Clock> InboundApplier<M, C> {
    pub fn new(pipeline: Arc<MutationPipeline<M, C>>) -> Self {
        Self {
            pipeline,
            lock: Mutex::new(()),
        }
    }

    pub async fn apply(&self, entry: &WalEntry) -> Result<ApplyOutcome, PipelineError> {
        let _serial = self.lock.lock().await;
        self.pipeline.apply_entry(entry).await
    }

    pub fn pipeline(&self) -> &Arc<MutationPipeline<M, C>> {
        &self.pipeline
    }
}

/// Where this node's WAL files live
#[derive(Debug, Clone)]
pub struct WalHistory {
    pub dir: PathBuf,
    pub prefix: String,
}

pub struct ReplicationServer<M, C> {
    inbound: Arc<InboundApplier<M, C>>,
    /// `None` when this node keeps no WAL
    history: Option<WalHistory>,
}

impl<M: Matcher, C: Clock> ReplicationServer<M, C> {
    pub fn new(inbound: Arc<InboundApplier<M, C>>, history: Option<WalHistory>) -> Self {
        Self { inbound, history }
    }

    /// Accept connections until the task is dropped
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream).await {
                            warn!(peer = %peer, error = %e, "replication connection failed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "error accepting replication connection");
                }
            }
        }
    }

    /// Serve a single connection
    pub async fn handle_connection<S>(&self, stream: S) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        let request: Request = match protocol::recv(&mut reader, DEFAULT_TIMEOUT).await {
            Ok(req) => req,
            Err(ProtocolError::ConnectionClosed) => {
                debug!("peer disconnected before sending request");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match request {
            Request::Ping => {
                let pong = Response::Pong {
                    version: PROTOCOL_VERSION.to_string(),
                };
                protocol::send(&mut writer, &pong, DEFAULT_TIMEOUT).await?;
            }
            Request::StreamFrom { timestamp } => self.stream_history(timestamp, &mut writer).await?,
            Request::ApplyEntry { entry } => {
                let response = self.apply(&entry).await;
                protocol::send(&mut writer, &response, DEFAULT_TIMEOUT).await?;
            }
            Request::ApplyStream => self.apply_stream(&mut reader, &mut writer).await?,
        }
        Ok(())
    }

    async fn apply(&self, entry: &WalEntry) -> Response {
        match self.inbound.apply(entry).await {
            Ok(outcome) => Response::Applied {
                timestamp: outcome.ack(),
            },
            Err(e) => {
                warn!(
                    timestamp = entry.timestamp,
                    key = %entry.key_str(),
                    error = %e,
                    "rejected replicated entry"
                );
                Response::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn apply_stream<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut applied = 0u64;
        loop {
            let body = match protocol::read_message(reader).await {
                Ok(body) => body,
                Err(ProtocolError::ConnectionClosed) => break,
                Err(e) => return Err(e.into()),
            };
            let response = match protocol::decode::<Request>(&body)? {
                Request::ApplyEntry { entry } => self.apply(&entry).await,
                other => Response::Error {
                    message: format!("unexpected request in apply stream: {:?}", other),
                },
            };
            if matches!(response, Response::Applied { timestamp } if timestamp > 0) {
                applied += 1;
            }
            protocol::send(writer, &response, DEFAULT_TIMEOUT).await?;
        }
        debug!(applied, "apply stream closed");
        Ok(())
    }

    /// Stream every entry after `after`: WAL files first, then entries
    /// still waiting in the journal.
    async fn stream_history<W>(&self, after: u64, writer: &mut W) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin,
    {
        // Snapshot before reading files: anything that leaves the journal
        // after this point is already on disk.
        let pending = self
            .inbound
            .pipeline()
            .journal()
            .map(|journal| journal.unflushed())
            .unwrap_or_default();

        let mut feed = history_feed(self.history.clone(), pending, after);
        let mut sent = 0u64;
        while let Some(response) = feed.recv().await {
            protocol::send(writer, &response, DEFAULT_TIMEOUT).await?;
            if matches!(response, Response::Error { .. }) {
                return Ok(());
            }
            sent += 1;
        }

        protocol::send(writer, &Response::EndOfStream, DEFAULT_TIMEOUT).await?;
        info!(after, sent, "streamed history to peer");
        Ok(())
    }
}

/// Every entry after `after`: WAL files from `history` first, then
/// `pending`. A read failure ends the feed with [`Response::Error`].
pub(crate) fn history_feed(
    history: Option<WalHistory>,
    pending: Vec<WalEntry>,
    after: u64,
) -> mpsc::Receiver<Response> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(async move {
        if let Some(history) = history {
            let file_tx = tx.clone();
            match tokio::task::spawn_blocking(move || read_history(&history, after, &file_tx)).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    error!(error = %e, "history reader task failed");
                    let message = format!("history reader failed: {}", e);
                    let _ = tx.send(Response::Error { message }).await;
                    return;
                }
            }
        }
        for entry in pending.into_iter().filter(|e| e.timestamp > after) {
            let response = Response::Entry {
                source_file: PENDING_SOURCE.to_string(),
                entry,
            };
            if tx.send(response).await.is_err() {
                return;
            }
        }
    });
    rx
}

/// Blocking file scan feeding [`history_feed`]; false if it stopped early
fn read_history(history: &WalHistory, after: u64, tx: &mpsc::Sender<Response>) -> bool {
    let fail = |message: String| {
        let _ = tx.blocking_send(Response::Error { message });
        false
    };

    let files = match find_files_on_or_after(&history.dir, &history.prefix, after) {
        Ok(files) => files,
        Err(e) => return fail(format!("cannot list WAL files: {}", e)),
    };

    let newest = files.len().saturating_sub(1);
    for (index, name) in files.iter().enumerate() {
        let source_file = name
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut file = match WalFile::open(&name.path) {
            Ok(file) => file,
            Err(e) => return fail(format!("{}: {}", source_file, e)),
        };

        for result in file.entries() {
            match result {
                Ok(entry) if entry.timestamp > after => {
                    let response = Response::Entry {
                        source_file: source_file.clone(),
                        entry,
                    };
                    // Receiver gone: the peer hung up.
                    if tx.blocking_send(response).is_err() {
                        return false;
                    }
                }
                Ok(_) => {}
                Err(e @ WalError::UnknownAction { .. }) => {
                    warn!(file = %source_file, error = %e, "skipping unreadable record");
                }
                // The active file may end in a record that is still being written;
                // it is covered by the journal snapshot.
                Err(e) if index == newest && e.is_corruption() => {
                    debug!(file = %source_file, error = %e, "active WAL file ends mid-record");
                    break;
                }
                Err(e) => return fail(format!("{}: {}", source_file, e)),
            }
        }
    }
    true
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
#[path = "replication_tests.rs"]
mod tests;
