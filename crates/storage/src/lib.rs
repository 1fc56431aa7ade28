// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! munchkin-storage: binary write-ahead log
//!
//! ```text
//! mutation → WalEntry → WalFileManager → <prefix><nanos>.wal (rotated by entry count)
//!                                              ↓
//!                        find_files_on_or_after → WalFile::next_entry → replay / replication
//! ```

pub mod discovery;
pub mod entry;
pub mod error;
pub mod file;
pub mod manager;

pub use discovery::{find_files_on_or_after, list_wal_files, wal_file_name, WalFileName};
pub use entry::{Action, WalEntry, MIN_RECORD_LEN};
pub use error::WalError;
pub use file::{WalFile, HEADER_LEN, MAGIC};
pub use manager::{WalFileManager, WalManagerConfig};

use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
