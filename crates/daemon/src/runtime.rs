// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory runtime state, one entry per tracked source.
//!
//! Entries live behind `Arc<Mutex<_>>`: all mutation happens under the
//! per-source lock, readers snapshot by copy, and locks are never held
//! across `.await`. The table itself (source → entry, task → source) is an
//! arena-plus-index guarded by one process-wide lock held only for
//! pointer-level updates.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use vcr_core::{RecordingState, SourceId, TaskId, WorkerState};

/// Circular log buffer size, lines.
pub const LOG_BUFFER_CAP: usize = 200;

/// Bounded FIFO of recent log lines for one source.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    lines: VecDeque<String>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == LOG_BUFFER_CAP {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Copy of the whole buffer, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Copy of the newest `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Live state of one source's recorder worker.
#[derive(Debug, Default)]
pub struct RuntimeEntry {
    pub worker_state: WorkerState,
    /// Current child pid; 0 when none.
    pub pid: u32,
    /// Sticky human-readable error, cleared only by an explicit reset.
    pub last_error: Option<String>,
    pub logs: LogBuffer,
    pub recording_state: Option<RecordingState>,
    /// Latched from the first `RECORDING START` until `SESSION END` or
    /// process exit; segment boundaries and sleeps do not clear it.
    pub session_active: bool,
    pub session_started_at: Option<DateTime<Utc>>,
    pub last_recording_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Recorder-reported duration string from the last heartbeat.
    pub session_duration: Option<String>,
    /// Last-known overseer task binding.
    pub task_id: Option<TaskId>,
}

impl RuntimeEntry {
    /// Wipe session-derived fields (process exit or session end).
    pub fn clear_session(&mut self) {
        self.recording_state = None;
        self.session_active = false;
        self.session_started_at = None;
        self.session_duration = None;
    }
}

/// Source-id → entry arena plus the task-id → source-id index.
#[derive(Default)]
pub struct RuntimeTable {
    entries: RwLock<HashMap<SourceId, Arc<Mutex<RuntimeEntry>>>>,
    by_task: RwLock<HashMap<TaskId, SourceId>>,
}

impl RuntimeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the entry for a source.
    pub fn entry(&self, source_id: SourceId) -> Arc<Mutex<RuntimeEntry>> {
        if let Some(entry) = self.entries.read().get(&source_id) {
            return entry.clone();
        }
        self.entries
            .write()
            .entry(source_id)
            .or_insert_with(|| Arc::new(Mutex::new(RuntimeEntry::default())))
            .clone()
    }

    pub fn get(&self, source_id: SourceId) -> Option<Arc<Mutex<RuntimeEntry>>> {
        self.entries.read().get(&source_id).cloned()
    }

    pub fn source_for_task(&self, task_id: &TaskId) -> Option<SourceId> {
        self.by_task.read().get(task_id).copied()
    }

    /// Bind a task id to a source in the index. The store binding must be
    /// persisted first so the two stay consistent across a crash.
    pub fn bind_task(&self, task_id: TaskId, source_id: SourceId) {
        self.by_task.write().insert(task_id, source_id);
    }

    pub fn unbind_task(&self, task_id: &TaskId) {
        self.by_task.write().remove(task_id);
    }

    /// Snapshot of all tracked entries.
    pub fn tracked(&self) -> Vec<(SourceId, Arc<Mutex<RuntimeEntry>>)> {
        let mut entries: Vec<_> =
            self.entries.read().iter().map(|(id, e)| (*id, e.clone())).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    #[cfg(test)]
    pub(crate) fn task_index_len(&self) -> usize {
        self.by_task.read().len()
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
