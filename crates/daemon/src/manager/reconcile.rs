// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconciliation between runtime state and the overseer's task table.
//!
//! The overseer is authoritative for what is actually running: when the two
//! disagree, runtime state is corrected, never the overseer. Two passes
//! share the claim/batch-start machinery:
//!
//! - on-connect (also the startup pass, since the daemon reconciles on its
//!   first connection): claim running tasks by task id or by
//!   `driver/username`, normalize stale entries, start what is demanded
//!   but not running
//! - periodic: catch tasks that vanished between connects and demanded
//!   sources that never got a worker

use super::Manager;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use vcr_core::{Clock, Source, SourceId, WorkerState};
use vcr_overseer::{Overseer, TaskInfo};

/// Task table indexed the two ways reconciliation resolves sources.
struct TaskIndices {
    by_id: HashMap<vcr_core::TaskId, TaskInfo>,
    /// `driver/username` → running task only.
    by_action_source: HashMap<String, TaskInfo>,
}

fn index_tasks(tasks: Vec<TaskInfo>) -> TaskIndices {
    let mut by_id = HashMap::new();
    let mut by_action_source = HashMap::new();
    for task in tasks {
        if task.is_running() {
            if let Some(source) = task.source_param() {
                by_action_source.insert(format!("{}/{}", task.action, source), task.clone());
            }
        }
        by_id.insert(task.task_id.clone(), task);
    }
    TaskIndices { by_id, by_action_source }
}

impl<C: Clock + 'static> Manager<C> {
    /// Reconcile after (re)connecting to the overseer.
    ///
    /// Claims running tasks for tracked sources, normalizes entries whose
    /// task is gone, and batch-starts every demanded source left without a
    /// worker. Errored sources are skipped; they require an explicit reset.
    pub async fn reconcile_on_connect(self: &Arc<Self>) {
        let tasks = match self.overseer.list().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(%e, "reconcile: task list unavailable");
                return;
            }
        };
        let idx = index_tasks(tasks);
        let mut to_start = Vec::new();

        for (source_id, entry) in self.runtime.tracked() {
            let Some(source) = self.store.source(source_id) else { continue };
            let demanded = self.demanded(source_id);
            let (state, bound) = {
                let e = entry.lock();
                (e.worker_state, e.task_id.clone())
            };
            if state == WorkerState::Errored {
                continue;
            }

            if let Some(task) = find_live_task(&idx, &source, bound.as_ref()) {
                if demanded {
                    self.claim(&source, &task).await;
                } else {
                    // Demand dropped while we were away; finish the stop.
                    info!(source = %source.key(), task = %task.task_id, "stopping undemanded task");
                    self.runtime.bind_task(task.task_id.clone(), source.id);
                    {
                        entry.lock().task_id = Some(task.task_id.clone());
                    }
                    self.stop_worker(source_id).await;
                    normalize_idle(&entry);
                }
                continue;
            }

            // No live task behind this entry
            if matches!(state, WorkerState::Running | WorkerState::Starting) {
                info!(source = %source.key(), "no live task after reconnect, resetting");
            }
            normalize_idle(&entry);
            if demanded {
                to_start.push(source_id);
            }
        }

        self.batch_start(to_start).await;
    }

    /// One periodic pass: correct runtime entries that drifted from the
    /// overseer's table since the last event.
    pub async fn reconcile_once(self: &Arc<Self>) {
        if !self.overseer.connected() {
            debug!("reconcile: overseer not connected, skipping");
            return;
        }
        let tasks = match self.overseer.list().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(%e, "reconcile: task list unavailable");
                return;
            }
        };
        let idx = index_tasks(tasks);
        let mut to_start = Vec::new();

        for (source_id, entry) in self.runtime.tracked() {
            let Some(source) = self.store.source(source_id) else { continue };
            let demanded = self.demanded(source_id);
            let (state, bound) = {
                let e = entry.lock();
                (e.worker_state, e.task_id.clone())
            };

            match state {
                // In-flight starts and sticky errors are left alone
                WorkerState::Errored | WorkerState::Starting => {}
                WorkerState::Running => {
                    let live = bound
                        .as_ref()
                        .and_then(|t| idx.by_id.get(t))
                        .is_some_and(TaskInfo::is_running);
                    if !live {
                        info!(source = %source.key(), "running task vanished from overseer");
                        normalize_idle(&entry);
                        if demanded {
                            to_start.push(source_id);
                        }
                    }
                }
                WorkerState::Idle => {
                    if demanded {
                        if let Some(task) = idx.by_action_source.get(&source.key().to_string()) {
                            self.claim(&source, task).await;
                        } else {
                            to_start.push(source_id);
                        }
                    }
                }
            }
        }

        self.batch_start(to_start).await;
    }

    /// Bind an already-running overseer task to a local source: persist the
    /// id (store first, then index), flip the entry to running, and
    /// subscribe for its future events — fan-out is per-subscriber, so a
    /// claimed task is silent until we opt in.
    pub(crate) async fn claim(&self, source: &Source, task: &TaskInfo) {
        if source.overseer_task_id.as_ref() != Some(&task.task_id) {
            if let Err(e) = self.store.set_source_task_id(source.id, Some(task.task_id.clone())) {
                warn!(source = %source.key(), task = %task.task_id, %e, "claim: persist failed");
                return;
            }
        }
        self.runtime.bind_task(task.task_id.clone(), source.id);

        let entry = self.runtime.entry(source.id);
        let stale = { entry.lock().task_id.clone() };
        if let Some(stale) = stale.filter(|t| t != &task.task_id) {
            // Rebinding: drop the dead id from the index
            self.runtime.unbind_task(&stale);
        }
        {
            let mut e = entry.lock();
            e.task_id = Some(task.task_id.clone());
            e.pid = task.current_pid;
            e.worker_state = WorkerState::Running;
            e.logs.push(format!("[system] claimed running task={}", task.task_id));
        }
        if let Err(e) = self.overseer.subscribe(&task.task_id).await {
            warn!(source = %source.key(), task = %task.task_id, %e, "claim: subscribe failed");
        }
        info!(source = %source.key(), task = %task.task_id, pid = task.current_pid, "claimed running task");
    }

    /// Start a batch of workers with bounded concurrency so a reconnect
    /// storm cannot flood the overseer into start timeouts.
    pub(crate) async fn batch_start(self: &Arc<Self>, pending: Vec<SourceId>) {
        if pending.is_empty() {
            return;
        }
        let concurrency =
            self.store.config().map(|c| c.start_concurrency).unwrap_or(5).max(1);
        info!(count = pending.len(), concurrency, "batch starting workers");

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(pending.len());
        for source_id in pending {
            let mgr = Arc::clone(self);
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else { return };
                if let Err(e) = mgr.start_worker(source_id).await {
                    warn!(source = source_id, %e, "batch start failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Resolve the live running task for a source: by bound id first, then by
/// the `driver/username` key (the task id is only a cache).
fn find_live_task(
    idx: &TaskIndices,
    source: &Source,
    bound: Option<&vcr_core::TaskId>,
) -> Option<TaskInfo> {
    if let Some(task_id) = bound {
        if let Some(task) = idx.by_id.get(task_id) {
            if task.is_running() {
                return Some(task.clone());
            }
        }
    }
    idx.by_action_source.get(&source.key().to_string()).cloned()
}

fn normalize_idle(entry: &Arc<parking_lot::Mutex<crate::runtime::RuntimeEntry>>) {
    let mut e = entry.lock();
    if e.worker_state != WorkerState::Errored {
        e.worker_state = WorkerState::Idle;
    }
    e.pid = 0;
}
