// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::entry::Action;
use tempfile::TempDir;

const PATTERNS: [&str; 3] = [
    r#"{"sys":["filestore"],"evt":["file-created","file-versioned"]}"#,
    r#"{"sys":["authnz"],"evt":["user-login"]}"#,
    r#"{"sys":["infra"],"evt":["circuit-breaker-tripped"]}"#,
];

fn new_file(dir: &TempDir) -> PathBuf {
    WalFile::create(dir.path(), "wal-").unwrap()
}

fn sample_entries() -> Vec<WalEntry> {
    vec![
        WalEntry::add(100, "first-test-key", PATTERNS[0]),
        WalEntry::add(200, "second-test-key", PATTERNS[1]),
        WalEntry::delete(300, "first-test-key"),
        WalEntry::add(400, "third-test-key", PATTERNS[2]),
    ]
}

#[test]
fn create_writes_zeroed_header() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len() as u64, HEADER_LEN);
    assert_eq!(&bytes[..8], b"MUNCH-01");
    assert!(bytes[8..].iter().all(|b| *b == 0));
}

#[test]
fn create_refuses_existing_file() {
    let dir = TempDir::new().unwrap();
    WalFile::create_at(dir.path(), "wal-", 42).unwrap();
    let err = WalFile::create_at(dir.path(), "wal-", 42).unwrap_err();
    assert!(matches!(err, WalError::AlreadyExists(_)));
}

#[test]
fn write_close_reopen_next() {
    let dir = TempDir::new().unwrap();
    let path = WalFile::create(dir.path(), "wal-").unwrap();

    let mut wal = WalFile::open(&path).unwrap();
    wal.write(&WalEntry::add(100, "k1", "{...}")).unwrap();
    wal.close().unwrap();

    let mut wal = WalFile::open(&path).unwrap();
    assert!(wal.has_next());
    let entry = wal.next_entry().unwrap();
    assert_eq!(entry.timestamp, 100);
    assert_eq!(entry.key, b"k1");
    assert_eq!(entry.pattern, b"{...}");
    assert_eq!(entry.action.code(), 32);
    assert!(!wal.has_next());
}

#[test]
fn reads_back_all_records_in_write_order() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);

    let mut wal = WalFile::open(&path).unwrap();
    for entry in sample_entries() {
        wal.write(&entry).unwrap();
    }
    wal.close().unwrap();

    let mut wal = WalFile::open(&path).unwrap();
    let read: Vec<WalEntry> = wal.entries().collect::<Result<_, _>>().unwrap();
    assert_eq!(read, sample_entries());
    assert_eq!(wal.entries_read(), 4);
}

#[test]
fn appends_across_separate_opens() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);

    for entry in sample_entries() {
        let mut wal = WalFile::open(&path).unwrap();
        wal.write(&entry).unwrap();
        wal.close().unwrap();
    }

    let mut wal = WalFile::open(&path).unwrap();
    let read: Vec<WalEntry> = wal.entries().collect::<Result<_, _>>().unwrap();
    assert_eq!(read, sample_entries());
}

#[test]
fn rewind_rereads_from_first_record() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);

    let mut wal = WalFile::open(&path).unwrap();
    for entry in sample_entries() {
        wal.write(&entry).unwrap();
    }

    let first_pass = wal.entries().count();
    assert!(!wal.has_next());

    wal.rewind();
    assert!(wal.has_next());
    let second_pass: Vec<WalEntry> = wal.entries().collect::<Result<_, _>>().unwrap();
    assert_eq!(first_pass, 4);
    assert_eq!(second_pass, sample_entries());
}

#[test]
fn empty_record_is_exactly_minimum_size() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);

    let mut wal = WalFile::open(&path).unwrap();
    wal.write(&WalEntry::delete(7, "")).unwrap();
    assert_eq!(wal.size(), HEADER_LEN + MIN_RECORD_LEN);

    assert!(wal.has_next());
    let entry = wal.next_entry().unwrap();
    assert_eq!(entry.action, Action::Delete);
    assert!(!wal.has_next());
}

#[test]
fn trailing_partial_record_is_not_reported_as_next() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);
    {
        let mut wal = WalFile::open(&path).unwrap();
        wal.write(&WalEntry::add(1, "k", "p")).unwrap();
    }
    // Fewer bytes than the smallest legal record
    let mut bytes = std::fs::read(&path).unwrap();
    bytes.extend_from_slice(&[0x00; 14]);
    std::fs::write(&path, &bytes).unwrap();

    let mut wal = WalFile::open(&path).unwrap();
    wal.next_entry().unwrap();
    assert!(!wal.has_next());
}

#[test]
fn truncated_record_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);
    {
        let mut wal = WalFile::open(&path).unwrap();
        wal.write(&WalEntry::add(1, "key", "pattern")).unwrap();
        wal.write(&WalEntry::add(2, "key", "pattern")).unwrap();
    }
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let mut wal = WalFile::open(&path).unwrap();
    assert_eq!(wal.next_entry().unwrap().timestamp, 1);
    assert!(wal.has_next());
    let err = wal.next_entry().unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn bad_frame_marker_stops_iteration() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);
    {
        let mut wal = WalFile::open(&path).unwrap();
        wal.write(&WalEntry::add(1, "a", "p")).unwrap();
        wal.write(&WalEntry::add(2, "b", "p")).unwrap();
        wal.write(&WalEntry::add(3, "c", "p")).unwrap();
    }
    let mut bytes = std::fs::read(&path).unwrap();
    let second = (HEADER_LEN + WalEntry::add(1, "a", "p").encoded_len() as u64) as usize;
    bytes[second] = 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let mut wal = WalFile::open(&path).unwrap();
    let results: Vec<_> = wal.entries().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(results[1].as_ref().unwrap_err().is_corruption());
}

#[test]
fn unknown_action_skips_only_that_record() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);
    {
        let mut wal = WalFile::open(&path).unwrap();
        wal.write(&WalEntry::add(1, "a", "p")).unwrap();
        wal.write(&WalEntry::add(2, "b", "p")).unwrap();
    }
    let mut bytes = std::fs::read(&path).unwrap();
    let first_end = (HEADER_LEN + WalEntry::add(1, "a", "p").encoded_len() as u64) as usize;
    bytes[first_end - 1] = 0x99;
    std::fs::write(&path, &bytes).unwrap();

    let mut wal = WalFile::open(&path).unwrap();
    let results: Vec<_> = wal.entries().collect();
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], Err(WalError::UnknownAction { .. })));
    assert_eq!(results[1].as_ref().unwrap().timestamp, 2);
}

#[test]
fn open_rejects_wrong_magic() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wal-1.wal");
    let mut bytes = vec![0u8; HEADER_LEN as usize];
    bytes[..8].copy_from_slice(b"MUNCH-02");
    std::fs::write(&path, &bytes).unwrap();

    let err = WalFile::open(&path).unwrap_err();
    assert!(matches!(err, WalError::Format { .. }));
}

#[test]
fn open_rejects_dirty_reserved_bytes() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[200] = 1;
    std::fs::write(&path, &bytes).unwrap();

    let err = WalFile::open(&path).unwrap_err();
    assert!(err.to_string().contains("reserved header byte 200"));
}

#[test]
fn open_rejects_short_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wal-1.wal");
    std::fs::write(&path, b"MUNCH-01").unwrap();

    assert!(matches!(
        WalFile::open(&path),
        Err(WalError::Format { .. })
    ));
}

#[test]
fn open_rejects_directory() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        WalFile::open(dir.path()),
        Err(WalError::Format { .. })
    ));
}

#[test]
fn delete_removes_file() {
    let dir = TempDir::new().unwrap();
    let path = new_file(&dir);
    let wal = WalFile::open(&path).unwrap();
    wal.delete().unwrap();
    assert!(!path.exists());
}
