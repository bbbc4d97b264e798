// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::{TimeZone, Utc};
use std::io::Write as _;
use tempfile::tempdir;
use vcr_core::{Source, TaskId};

fn test_op(n: i64) -> StoreOp {
    StoreOp::SourceCreated {
        source: Source {
            id: n,
            driver: "chaturbate".to_string(),
            username: format!("user{n}"),
            overseer_task_id: None,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        },
    }
}

#[test]
fn open_creates_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.wal");

    let wal = Wal::open(&path, 0).unwrap();

    assert!(path.exists());
    assert_eq!(wal.write_seq(), 0);
    assert_eq!(wal.processed_seq(), 0);
}

#[test]
fn append_and_flush() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.wal");

    let mut wal = Wal::open(&path, 0).unwrap();

    let seq1 = wal.append(&test_op(1)).unwrap();
    let seq2 = wal.append(&test_op(2)).unwrap();

    assert_eq!(seq1, 1);
    assert_eq!(seq2, 2);

    wal.flush().unwrap();

    let metadata = std::fs::metadata(&path).unwrap();
    assert!(metadata.len() > 0);
}

#[test]
fn next_unprocessed_streams_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.wal");

    let mut wal = Wal::open(&path, 0).unwrap();

    wal.append(&test_op(1)).unwrap();
    wal.append(&test_op(2)).unwrap();
    wal.flush().unwrap();

    let entry1 = wal.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry1.seq, 1);
    match &entry1.op {
        StoreOp::SourceCreated { source } => assert_eq!(source.username, "user1"),
        other => panic!("expected SourceCreated, got {other:?}"),
    }

    let entry2 = wal.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry2.seq, 2);

    assert!(wal.next_unprocessed().unwrap().is_none());
}

#[test]
fn mark_processed_advances_cursor() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.wal");

    let mut wal = Wal::open(&path, 0).unwrap();

    wal.append(&test_op(1)).unwrap();
    wal.flush().unwrap();

    let entry = wal.next_unprocessed().unwrap().unwrap();
    wal.mark_processed(entry.seq);

    assert_eq!(wal.processed_seq(), 1);
}

#[test]
fn reopen_with_processed_seq_skips_covered_entries() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&test_op(1)).unwrap();
        wal.append(&test_op(2)).unwrap();
        wal.append(&test_op(3)).unwrap();
        wal.flush().unwrap();
    }

    // Reopen as if recovering from a snapshot that covered seq 2
    let mut wal = Wal::open(&path, 2).unwrap();

    let entry = wal.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 3);
    match &entry.op {
        StoreOp::SourceCreated { source } => assert_eq!(source.username, "user3"),
        other => panic!("expected SourceCreated, got {other:?}"),
    }

    assert!(wal.next_unprocessed().unwrap().is_none());
}

#[test]
fn truncate_resumes_seq_numbering() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    wal.append(&test_op(1)).unwrap();
    wal.append(&test_op(2)).unwrap();
    wal.truncate().unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    assert_eq!(wal.processed_seq(), 2);

    let seq = wal.append(&test_op(3)).unwrap();
    assert_eq!(seq, 3);
    wal.flush().unwrap();

    // Reopen over the empty file: write cursor resumes at processed_seq
    drop(wal);
    let mut wal = Wal::open(&path, 2).unwrap();
    assert_eq!(wal.write_seq(), 3);
    let entry = wal.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 3);
}

#[test]
fn corrupt_tail_ends_replay() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.wal");

    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(&test_op(1)).unwrap();
        wal.flush().unwrap();
    }
    // Simulate a crash mid-write
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"seq\":2,\"op\":{\"type\":\"sou").unwrap();
    }

    let mut wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.write_seq(), 1);

    let entry = wal.next_unprocessed().unwrap().unwrap();
    assert_eq!(entry.seq, 1);
    assert!(wal.next_unprocessed().unwrap().is_none());
}

#[test]
fn task_binding_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.wal");

    let mut wal = Wal::open(&path, 0).unwrap();
    wal.append(&StoreOp::SourceTaskBound { id: 7, task_id: Some(TaskId::new("T1")) }).unwrap();
    wal.append(&StoreOp::SourceTaskBound { id: 7, task_id: None }).unwrap();
    wal.flush().unwrap();

    let bound = wal.next_unprocessed().unwrap().unwrap();
    match bound.op {
        StoreOp::SourceTaskBound { id, task_id } => {
            assert_eq!(id, 7);
            assert_eq!(task_id, Some(TaskId::new("T1")));
        }
        other => panic!("expected SourceTaskBound, got {other:?}"),
    }
    let cleared = wal.next_unprocessed().unwrap().unwrap();
    match cleared.op {
        StoreOp::SourceTaskBound { task_id, .. } => assert!(task_id.is_none()),
        other => panic!("expected SourceTaskBound, got {other:?}"),
    }
}
