// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overseer event callbacks and recorder event application.
//!
//! These run on the event-consumer loop fed by the client's read path, so
//! each handler completes in bounded time: mutate the entry under its lock,
//! append log/audit rows, return. The on-connect reconcile is the one
//! exception and runs in its own task.

use super::Manager;
use crate::runtime::RuntimeEntry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vcr_core::{Clock, RecorderEvent, RecordingState, SourceId, TaskId, WorkerEventKind, WorkerState};
use vcr_overseer::{OutputStream, OverseerEvent};

/// Log lines dumped to process logs on an unexpected exit.
const EXIT_DUMP_LINES: usize = 5;

impl<C: Clock + 'static> Manager<C> {
    /// Entry point for the overseer event consumer loop.
    pub async fn handle_event(self: &Arc<Self>, event: OverseerEvent) {
        match event {
            OverseerEvent::Connected => {
                let mgr = Arc::clone(self);
                tokio::spawn(async move { mgr.reconcile_on_connect().await });
            }
            OverseerEvent::Started { task_id, pid, restart_of, ts } => {
                self.on_started(&task_id, pid, restart_of.as_ref(), ts);
            }
            OverseerEvent::Output { task_id, stream, data, ts, .. } => {
                self.on_output(&task_id, stream, &data, ts);
            }
            OverseerEvent::Exited { task_id, pid, exit_code, intentional, ts } => {
                self.on_exited(&task_id, pid, exit_code, intentional, ts);
            }
            OverseerEvent::Restarting { task_id, attempt, .. } => {
                self.on_restarting(&task_id, attempt);
            }
            OverseerEvent::Errored { task_id, exit_count, .. } => {
                self.on_errored(&task_id, exit_count);
            }
        }
    }

    fn resolve(&self, task_id: &TaskId) -> Option<SourceId> {
        match self.runtime.source_for_task(task_id) {
            Some(source_id) => Some(source_id),
            None => {
                // Not ours (or binding already rebound); drop silently.
                debug!(task = %task_id, "event for unknown task");
                None
            }
        }
    }

    fn on_started(&self, task_id: &TaskId, pid: u32, restart_of: Option<&TaskId>, ts: DateTime<Utc>) {
        let Some(source_id) = self.resolve(task_id) else { return };
        let entry = self.runtime.entry(source_id);

        let mut e = entry.lock();
        let line = match restart_of {
            Some(_) => format!("[system] restarted (was {})", e.pid),
            None => format!("[system] started pid={pid}"),
        };
        e.pid = pid;
        e.worker_state = WorkerState::Running;
        e.logs.push(line);
        // Audit row and state flip stay together under the per-source lock.
        // One row per started frame — restart_of only changes the log line.
        if let Err(err) =
            self.store.append_worker_event(source_id, pid, WorkerEventKind::Started, None, ts)
        {
            warn!(source = source_id, %err, "failed to append started event");
        }
    }

    fn on_output(&self, task_id: &TaskId, stream: OutputStream, data: &str, ts: DateTime<Utc>) {
        let Some(source_id) = self.resolve(task_id) else { return };
        let entry = self.runtime.entry(source_id);

        let mut e = entry.lock();
        e.logs.push(format!("[{stream}] {}", data.trim_end()));
        if let Some(event) = RecorderEvent::parse(data) {
            if !matches!(event, RecorderEvent::Heartbeat { .. }) {
                info!(source = source_id, task = %task_id, ?event, "recorder event");
            }
            apply_recorder_event(&mut e, &event, ts);
        }
    }

    fn on_exited(
        &self,
        task_id: &TaskId,
        pid: u32,
        exit_code: i32,
        intentional: bool,
        ts: DateTime<Utc>,
    ) {
        let Some(source_id) = self.resolve(task_id) else { return };
        let entry = self.runtime.entry(source_id);

        let mut e = entry.lock();
        if e.pid == pid && pid != 0 {
            e.pid = 0;
            if e.worker_state == WorkerState::Running {
                e.worker_state = WorkerState::Idle;
            }
            e.clear_session();
            if !intentional && exit_code != 0 {
                let tail = e.logs.tail(EXIT_DUMP_LINES);
                warn!(
                    source = source_id,
                    task = %task_id,
                    exit_code,
                    last_lines = ?tail,
                    "recorder exited unexpectedly"
                );
            }
            e.logs.push(format!("[system] exited code={exit_code}"));
        }
        // A stale pid is a no-op on state but still audited.
        if let Err(err) = self.store.append_worker_event(
            source_id,
            pid,
            WorkerEventKind::Exited,
            Some(exit_code),
            ts,
        ) {
            warn!(source = source_id, %err, "failed to append exited event");
        }
    }

    fn on_restarting(&self, task_id: &TaskId, attempt: u32) {
        let Some(source_id) = self.resolve(task_id) else { return };
        let entry = self.runtime.entry(source_id);
        entry.lock().logs.push(format!("[system] restarting (attempt {attempt})"));
    }

    fn on_errored(&self, task_id: &TaskId, exit_count: u32) {
        let Some(source_id) = self.resolve(task_id) else { return };
        let entry = self.runtime.entry(source_id);

        let mut e = entry.lock();
        let message = format!("error threshold reached after {exit_count} exits");
        e.worker_state = WorkerState::Errored;
        e.last_error = Some(message.clone());
        e.logs.push(format!("[system] errored: {message}"));
        warn!(source = source_id, task = %task_id, exit_count, "worker errored");
    }
}

/// How each structured recorder event mutates the session-derived fields.
/// Runs under the per-source lock.
fn apply_recorder_event(entry: &mut RuntimeEntry, event: &RecorderEvent, ts: DateTime<Utc>) {
    match event {
        RecorderEvent::RecordingStart => {
            entry.recording_state = Some(RecordingState::Recording);
            if !entry.session_active {
                // Session anchor: first segment since the last session end
                entry.session_active = true;
                entry.session_started_at = Some(ts);
            }
            entry.last_recording_at = Some(ts);
        }
        RecorderEvent::RecordingEnd => {
            // Segment boundary: the session stays active
            entry.recording_state = Some(RecordingState::Idle);
        }
        RecorderEvent::Sleep => {
            // Source offline; the session may resume
            entry.recording_state = Some(RecordingState::Sleeping);
        }
        RecorderEvent::SessionEnd => {
            entry.recording_state = Some(RecordingState::Idle);
            entry.session_active = false;
            entry.session_started_at = None;
        }
        RecorderEvent::Heartbeat { session_duration } => {
            entry.recording_state = Some(RecordingState::Recording);
            entry.session_active = true;
            entry.last_heartbeat_at = Some(ts);
            if let Some(duration) = session_duration {
                entry.session_duration = Some(duration.clone());
            }
        }
    }
}
