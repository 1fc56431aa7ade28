// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replication wire protocol
//!
//! Every message is a 4-byte big-endian length followed by a JSON body.
//! A connection starts with one [`Request`]:
//!
//! - `StreamFrom` is answered by any number of `Entry` messages and a final
//!   `EndOfStream` (or `Error`).
//! - `ApplyEntry` is answered by one `Applied`.
//! - `ApplyStream` switches the connection into streaming mode: every
//!   following `ApplyEntry` gets one `Applied` until the peer hangs up.

use std::time::Duration;

use munchkin_storage::WalEntry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version, exchanged by `Ping`/`Pong`
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default timeout for a single message read or write
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on one message body
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Source file name reported for entries not yet on disk
pub const PENDING_SOURCE: &str = "(pending)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,
    /// Every logged entry with a timestamp after `timestamp`
    StreamFrom { timestamp: u64 },
    ApplyEntry { entry: WalEntry },
    ApplyStream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Pong {
        version: String,
    },
    Entry {
        source_file: String,
        entry: WalEntry,
    },
    EndOfStream,
    /// Local application time, or 0 when the entry was stale
    Applied {
        timestamp: u64,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message of {0} bytes exceeds the size limit")]
    MessageTooLarge(usize),

    #[error("timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,
}

/// Serialize a message body (no length prefix)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read one length-prefixed message body
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(ProtocolError::MessageTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Write one message body with its length prefix
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), ProtocolError> {
    if body.len() > MAX_MESSAGE_LEN {
        return Err(ProtocolError::MessageTooLarge(body.len()));
    }
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::MessageTooLarge(body.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode a message, failing after `timeout`
pub async fn recv<T: DeserializeOwned, R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<T, ProtocolError> {
    let body = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&body)
}

/// Encode and write a message, failing after `timeout`
pub async fn send<T: Serialize, W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &T,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let body = encode(message)?;
    tokio::time::timeout(timeout, write_message(writer, &body))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
