// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn log_buffer_evicts_fifo_at_cap() {
    let mut logs = LogBuffer::new();
    for i in 0..(LOG_BUFFER_CAP + 25) {
        logs.push(format!("line {i}"));
    }

    assert_eq!(logs.len(), LOG_BUFFER_CAP);
    let snapshot = logs.snapshot();
    assert_eq!(snapshot.first().map(String::as_str), Some("line 25"));
    assert_eq!(snapshot.last().map(String::as_str), Some("line 224"));
}

#[parameterized(
    shorter_than_buffer = { 3, 7 },
    exact = { 10, 0 },
    longer_than_buffer = { 100, 0 },
)]
fn log_buffer_tail_returns_newest_in_order(n: usize, first: usize) {
    let mut logs = LogBuffer::new();
    for i in 0..10 {
        logs.push(format!("line {i}"));
    }

    let tail = logs.tail(n);
    assert_eq!(tail.len(), n.min(10));
    assert_eq!(tail.first().cloned(), Some(format!("line {first}")));
    assert_eq!(tail.last().map(String::as_str), Some("line 9"));
}

#[test]
fn entry_is_created_lazily_and_shared() {
    let table = RuntimeTable::new();
    let a = table.entry(1);
    a.lock().pid = 1001;

    let b = table.entry(1);
    assert_eq!(b.lock().pid, 1001);
    assert!(table.get(2).is_none());
}

#[test]
fn task_index_binds_and_unbinds() {
    let table = RuntimeTable::new();
    table.bind_task(TaskId::new("T1"), 1);
    table.bind_task(TaskId::new("T2"), 2);

    assert_eq!(table.source_for_task(&TaskId::new("T1")), Some(1));
    assert_eq!(table.task_index_len(), 2);

    table.unbind_task(&TaskId::new("T1"));
    assert_eq!(table.source_for_task(&TaskId::new("T1")), None);
    assert_eq!(table.task_index_len(), 1);
}

#[test]
fn clear_session_wipes_derived_fields_only() {
    let mut entry = RuntimeEntry {
        worker_state: WorkerState::Running,
        pid: 1001,
        recording_state: Some(RecordingState::Recording),
        session_active: true,
        session_started_at: Some(Utc::now()),
        last_recording_at: Some(Utc::now()),
        session_duration: Some("00:10:00".to_string()),
        ..Default::default()
    };

    entry.clear_session();

    assert!(entry.recording_state.is_none());
    assert!(!entry.session_active);
    assert!(entry.session_started_at.is_none());
    assert!(entry.session_duration.is_none());
    // Historical fields and process state are untouched
    assert!(entry.last_recording_at.is_some());
    assert_eq!(entry.worker_state, WorkerState::Running);
    assert_eq!(entry.pid, 1001);
}
