// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker start/stop lifecycle.

use super::{Manager, ManagerError};
use crate::runtime::RuntimeEntry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vcr_core::{Clock, Config, Source, SourceId, WorkerEventKind, WorkerState};
use vcr_overseer::{Overseer, RetryPolicy, StartedTask};

/// Fixed heartbeat cadence requested from every recorder.
const HEARTBEAT_INTERVAL: &str = "30s";

/// Resets `starting` back to `idle` on drop unless disarmed, so no error
/// or timeout path can leave a source stuck in `starting`.
struct StartGuard {
    entry: Arc<Mutex<RuntimeEntry>>,
    armed: bool,
}

impl StartGuard {
    fn new(entry: Arc<Mutex<RuntimeEntry>>) -> Self {
        Self { entry, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if self.armed {
            let mut e = self.entry.lock();
            if e.worker_state == WorkerState::Starting {
                e.worker_state = WorkerState::Idle;
            }
        }
    }
}

/// Params handed to the overseer for one recorder task.
fn recorder_params(config: &Config, source: &Source) -> HashMap<String, String> {
    let r = &config.recorder;
    let out = r
        .path_template
        .replace("{driver}", &source.driver)
        .replace("{username}", &source.username);
    let segment = if r.segment_length.is_empty() { "0".to_string() } else { r.segment_length.clone() };

    let mut params = HashMap::from([
        ("source".to_string(), source.username.clone()),
        ("out".to_string(), out),
        ("segment_time".to_string(), segment),
        ("check_interval".to_string(), r.check_interval_secs.to_string()),
        ("resolution".to_string(), r.resolution.clone()),
        ("framerate".to_string(), r.framerate.clone()),
        ("heartbeat_interval".to_string(), HEARTBEAT_INTERVAL.to_string()),
    ]);
    if !r.cookies.is_empty() {
        params.insert("cookies".to_string(), r.cookies.clone());
    }
    if !r.user_agent.is_empty() {
        params.insert("user_agent".to_string(), r.user_agent.clone());
    }
    params
}

impl<C: Clock + 'static> Manager<C> {
    /// Start the recorder worker for a source.
    ///
    /// Rejects (successfully) when a start is already in flight or the
    /// worker is running. Any failure leaves the source `idle` for the next
    /// reconcile pass to retry.
    pub(crate) async fn start_worker(&self, source_id: SourceId) -> Result<(), ManagerError> {
        let source = self.source_required(source_id)?;
        let entry = self.runtime.entry(source_id);

        {
            let mut e = entry.lock();
            match e.worker_state {
                WorkerState::Running | WorkerState::Starting => {
                    debug!(source = %source.key(), state = %e.worker_state, "start rejected");
                    return Ok(());
                }
                // Sticky: only an explicit reset may relaunch an errored source
                WorkerState::Errored => {
                    debug!(source = %source.key(), "start rejected: errored, needs reset");
                    return Ok(());
                }
                WorkerState::Idle => e.worker_state = WorkerState::Starting,
            }
        }
        let guard = StartGuard::new(entry.clone());

        // Snapshot config and the current binding before any await
        let config = self.store.config()?;
        let prior_task =
            { entry.lock().task_id.clone() }.or_else(|| source.overseer_task_id.clone());

        let params = recorder_params(&config, &source);
        let retry = Some(RetryPolicy {
            restart_delay: config.restart_delay_secs,
            error_window: config.error_window_secs,
            error_threshold: config.error_threshold,
        });

        let started = match self
            .overseer
            .start(prior_task.clone(), &source.driver, params.clone(), retry.clone())
            .await
        {
            Ok(started) => started,
            Err(e) if e.is_already_running() && prior_task.is_some() => {
                match self.recover_already_running(&source, prior_task, params, retry).await? {
                    Some(started) => started,
                    None => return Ok(()), // guard resets starting → idle
                }
            }
            Err(e) => {
                entry.lock().logs.push(format!("[system] start failed: {e}"));
                debug!(source = %source.key(), %e, "start failed");
                return Ok(()); // guard resets starting → idle
            }
        };

        self.finish_start(&source, started, guard)
    }

    /// "Already running" recovery: stop the stale task, clear the binding
    /// in store and index, and retry with a fresh task id (own deadline).
    async fn recover_already_running(
        &self,
        source: &Source,
        prior_task: Option<vcr_core::TaskId>,
        params: HashMap<String, String>,
        retry: Option<RetryPolicy>,
    ) -> Result<Option<StartedTask>, ManagerError> {
        let Some(stale) = prior_task else { return Ok(None) };
        info!(source = %source.key(), task = %stale, "stale task already running, recovering");

        if let Err(e) = self.overseer.stop(&stale).await {
            warn!(source = %source.key(), task = %stale, %e, "stop of stale task failed");
        }
        self.store.set_source_task_id(source.id, None)?;
        self.runtime.unbind_task(&stale);
        if let Some(entry) = self.runtime.get(source.id) {
            entry.lock().task_id = None;
        }

        match self.overseer.start(None, &source.driver, params, retry).await {
            Ok(started) => Ok(Some(started)),
            Err(e) => {
                if let Some(entry) = self.runtime.get(source.id) {
                    entry.lock().logs.push(format!("[system] start failed: {e}"));
                }
                debug!(source = %source.key(), %e, "retry start failed");
                Ok(None)
            }
        }
    }

    /// Persist the (possibly new) task binding, then flip the runtime entry
    /// to running. Store before index, so the two survive a crash in a
    /// consistent order.
    fn finish_start(
        &self,
        source: &Source,
        started: StartedTask,
        guard: StartGuard,
    ) -> Result<(), ManagerError> {
        // Re-read the binding: the already-running recovery clears it
        let current = self.store.source(source.id).and_then(|s| s.overseer_task_id);
        if current.as_ref() != Some(&started.task_id) {
            self.store.set_source_task_id(source.id, Some(started.task_id.clone()))?;
        }
        self.runtime.bind_task(started.task_id.clone(), source.id);

        let entry = self.runtime.entry(source.id);
        {
            let mut e = entry.lock();
            e.task_id = Some(started.task_id.clone());
            e.pid = started.pid;
            e.worker_state = WorkerState::Running;
            e.logs
                .push(format!("[system] started task={} pid={}", started.task_id, started.pid));
        }
        guard.disarm();
        info!(source = %source.key(), task = %started.task_id, pid = started.pid, "worker started");
        Ok(())
    }

    /// Ask the overseer to stop the source's bound task, if any. Errors are
    /// logged, never surfaced; runtime state changes only when the `exited`
    /// event arrives.
    pub(crate) async fn stop_worker(&self, source_id: SourceId) {
        let Some(entry) = self.runtime.get(source_id) else { return };
        let (task_id, pid) = {
            let e = entry.lock();
            (e.task_id.clone(), e.pid)
        };
        let Some(task_id) = task_id else { return };

        info!(source = source_id, task = %task_id, "stopping worker");
        if let Err(e) = self.overseer.stop(&task_id).await {
            warn!(source = source_id, task = %task_id, %e, "stop request failed");
        }
        // Intentional-stop audit row; the exited event mutates state.
        let ts = self.clock.now_utc();
        if let Err(e) =
            self.store.append_worker_event(source_id, pid, WorkerEventKind::Stopped, None, ts)
        {
            warn!(source = source_id, %e, "failed to append stopped event");
        }
    }
}
