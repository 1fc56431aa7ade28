// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sequential reader/writer over a single WAL file
//!
//! A file starts with a 256-byte header: the magic `MUNCH-01` followed by
//! 248 reserved zero bytes. Records follow back-to-back (see [`crate::entry`]).

use crate::discovery::wal_file_name;
use crate::entry::{RecordHeader, WalEntry, MIN_RECORD_LEN, RECORD_HEADER_LEN};
use crate::error::WalError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes at the start of every WAL file
pub const MAGIC: &[u8; 8] = b"MUNCH-01";

/// Header size; the first record starts here
pub const HEADER_LEN: u64 = 256;

/// An open WAL file with a read cursor
///
/// Reads walk forward from the header with [`WalFile::has_next`] and
/// [`WalFile::next_entry`]. Writes always append at the end of the file and
/// are synced before returning.
#[derive(Debug)]
pub struct WalFile {
    path: PathBuf,
    file: File,
    writable: bool,
    size: u64,
    cursor: u64,
    entries_read: u64,
}

impl WalFile {
    /// Create `<prefix><now-nanos>.wal` in `dir` with a fresh header
    pub fn create(dir: &Path, prefix: &str) -> Result<PathBuf, WalError> {
        Self::create_at(dir, prefix, crate::unix_nanos())
    }

    /// Create a WAL file with an explicit creation timestamp
    ///
    /// Fails with [`WalError::AlreadyExists`] rather than clobbering a file.
    pub fn create_at(dir: &Path, prefix: &str, created_at: u64) -> Result<PathBuf, WalError> {
        let path = dir.join(wal_file_name(prefix, created_at));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(WalError::AlreadyExists(path));
            }
            Err(e) => return Err(e.into()),
        };

        let mut header = [0u8; HEADER_LEN as usize];
        header[..MAGIC.len()].copy_from_slice(MAGIC);
        file.write_all(&header)?;
        file.sync_all()?;
        Ok(path)
    }

    /// Open an existing WAL file and validate its header
    ///
    /// Files we are not allowed to write are opened read-only.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let meta = fs::metadata(path)?;
        if meta.is_dir() {
            return Err(format_error(path, "path is a directory"));
        }

        let (mut file, writable) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => (f, true),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => (File::open(path)?, false),
            Err(e) => return Err(e.into()),
        };

        let size = meta.len();
        if size < HEADER_LEN {
            return Err(format_error(
                path,
                &format!("file is {} bytes, shorter than the header", size),
            ));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if &header[..MAGIC.len()] != MAGIC {
            return Err(format_error(
                path,
                &format!(
                    "expected magic {:?}, got {:?}",
                    String::from_utf8_lossy(MAGIC),
                    String::from_utf8_lossy(&header[..MAGIC.len()])
                ),
            ));
        }
        if let Some(pos) = header[MAGIC.len()..].iter().position(|b| *b != 0) {
            return Err(format_error(
                path,
                &format!("reserved header byte {} is not zero", pos + MAGIC.len()),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            writable,
            size,
            cursor: HEADER_LEN,
            entries_read: 0,
        })
    }

    /// Whether enough bytes remain after the cursor to hold a legal record
    pub fn has_next(&self) -> bool {
        self.remaining() >= MIN_RECORD_LEN
    }

    /// Decode the record at the cursor and advance past it
    ///
    /// On [`WalError::CorruptRecord`] the cursor does not move and the rest of
    /// the file should be abandoned. On [`WalError::UnknownAction`] the cursor
    /// has already moved past the record.
    pub fn next_entry(&mut self) -> Result<WalEntry, WalError> {
        let offset = self.cursor;
        let remaining = self.remaining();
        if remaining < MIN_RECORD_LEN {
            return Err(truncated(offset, remaining));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; RECORD_HEADER_LEN];
        read_record_bytes(&mut self.file, &mut header, offset)?;
        let header = RecordHeader::parse(&header, offset)?;
        if header.record_len() > remaining {
            return Err(truncated(offset, remaining));
        }

        let mut body = vec![0u8; header.body_len()];
        read_record_bytes(&mut self.file, &mut body, offset)?;

        self.cursor += header.record_len();
        self.entries_read += 1;
        header.finish(&body)
    }

    /// Iterate from the cursor, stopping after the first corrupt record
    pub fn entries(&mut self) -> Entries<'_> {
        Entries {
            file: self,
            done: false,
        }
    }

    /// Append one record at the end of the file and sync it
    pub fn write(&mut self, entry: &WalEntry) -> Result<(), WalError> {
        if !self.writable {
            return Err(WalError::ReadOnly(self.path.clone()));
        }
        let buf = entry.encode()?;
        let end = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        self.size = end + buf.len() as u64;
        Ok(())
    }

    /// Move the cursor back to the first record; the header is not re-read
    pub fn rewind(&mut self) {
        self.cursor = HEADER_LEN;
        self.entries_read = 0;
    }

    /// Sync and close the file
    pub fn close(self) -> Result<(), WalError> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }

    /// Remove the file from storage
    pub fn delete(self) -> Result<(), WalError> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes as last seen by this handle
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entries decoded since open or the last rewind
    pub fn entries_read(&self) -> u64 {
        self.entries_read
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.cursor)
    }
}

/// Iterator returned by [`WalFile::entries`]
pub struct Entries<'a> {
    file: &'a mut WalFile,
    done: bool,
}

impl Iterator for Entries<'_> {
    type Item = Result<WalEntry, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || !self.file.has_next() {
            return None;
        }
        let result = self.file.next_entry();
        if matches!(&result, Err(e) if !matches!(e, WalError::UnknownAction { .. })) {
            self.done = true;
        }
        Some(result)
    }
}

fn read_record_bytes(file: &mut File, buf: &mut [u8], offset: u64) -> Result<(), WalError> {
    file.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WalError::CorruptRecord {
                offset,
                reason: "record cut short by end of file".to_string(),
            }
        } else {
            WalError::Io(e)
        }
    })
}

fn truncated(offset: u64, remaining: u64) -> WalError {
    WalError::CorruptRecord {
        offset,
        reason: format!("only {} bytes remain, record is truncated", remaining),
    }
}

fn format_error(path: &Path, reason: &str) -> WalError {
    WalError::Format {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
