// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replication client for talking to a peer's replication server

use std::time::Duration;

use munchkin_storage::WalEntry;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::protocol::{self, ProtocolError, Request, Response, DEFAULT_TIMEOUT};

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("peer reported an error: {0}")]
    Remote(String),

    #[error("unexpected response from peer: {0}")]
    UnexpectedResponse(String),

    #[error("cannot read local history: {0}")]
    History(String),
}

fn unexpected(response: Response) -> ReplicationError {
    match response {
        Response::Error { message } => ReplicationError::Remote(message),
        other => ReplicationError::UnexpectedResponse(format!("{:?}", other)),
    }
}

/// Client for one peer's replication address
#[derive(Debug, Clone)]
pub struct ReplicationClient {
    addr: String,
    timeout: Duration,
}

impl ReplicationClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Per-message timeout (connect, each read and write)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn open(&self, request: &Request) -> Result<(OwnedReadHalf, OwnedWriteHalf), ReplicationError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ReplicationError::ConnectTimeout(self.addr.clone()))?
            .map_err(|source| ReplicationError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (reader, mut writer) = stream.into_split();
        protocol::send(&mut writer, request, self.timeout).await?;
        Ok((reader, writer))
    }

    /// Round-trip a ping; returns the peer's protocol version
    pub async fn ping(&self) -> Result<String, ReplicationError> {
        let (mut reader, _writer) = self.open(&Request::Ping).await?;
        match protocol::recv(&mut reader, self.timeout).await? {
            Response::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Send one entry; returns the peer's application time or 0 if stale
    pub async fn apply_entry(&self, entry: &WalEntry) -> Result<u64, ReplicationError> {
        let request = Request::ApplyEntry {
            entry: entry.clone(),
        };
        let (mut reader, _writer) = self.open(&request).await?;
        match protocol::recv(&mut reader, self.timeout).await? {
            Response::Applied { timestamp } => Ok(timestamp),
            other => Err(unexpected(other)),
        }
    }

    /// Request every entry the peer logged after `timestamp`
    pub async fn stream_from(&self, timestamp: u64) -> Result<HistoryStream, ReplicationError> {
        let (reader, writer) = self.open(&Request::StreamFrom { timestamp }).await?;
        Ok(HistoryStream {
            reader,
            _writer: writer,
            timeout: self.timeout,
            done: false,
        })
    }

    /// Open a long-lived connection for sending many entries
    pub async fn apply_stream(&self) -> Result<ApplyStream, ReplicationError> {
        let (reader, writer) = self.open(&Request::ApplyStream).await?;
        Ok(ApplyStream {
            reader,
            writer,
            timeout: self.timeout,
        })
    }
}

/// Entries streamed by a peer, in its log order
pub struct HistoryStream {
    reader: OwnedReadHalf,
    _writer: OwnedWriteHalf,
    timeout: Duration,
    done: bool,
}

impl HistoryStream {
    /// Next `(source_file, entry)`, or `None` once the peer ends the stream
    pub async fn next(&mut self) -> Result<Option<(String, WalEntry)>, ReplicationError> {
        if self.done {
            return Ok(None);
        }
        match protocol::recv(&mut self.reader, self.timeout).await? {
            Response::Entry { source_file, entry } => Ok(Some((source_file, entry))),
            Response::EndOfStream => {
                self.done = true;
                Ok(None)
            }
            other => {
                self.done = true;
                Err(unexpected(other))
            }
        }
    }
}

/// Long-lived apply connection; one acknowledgement per entry
pub struct ApplyStream {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl ApplyStream {
    pub async fn send(&mut self, entry: &WalEntry) -> Result<u64, ReplicationError> {
        let request = Request::ApplyEntry {
            entry: entry.clone(),
        };
        protocol::send(&mut self.writer, &request, self.timeout).await?;
        match protocol::recv(&mut self.reader, self.timeout).await? {
            Response::Applied { timestamp } => Ok(timestamp),
            other => Err(unexpected(other)),
        }
    }
}
