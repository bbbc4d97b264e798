// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The manager: subscription postures in, worker lifecycles out.
//!
//! All start/stop decisions flow through here. User actions update the
//! store, adjust runtime state, and issue overseer RPCs; overseer events
//! come back via [`Manager::handle_event`]; three reconciliation passes
//! realign runtime state with the overseer's authoritative task list.
//!
//! Lock discipline: callbacks never take the table-wide lock while holding
//! a per-source lock, and per-source locks are never held across `.await`.

mod events;
mod ops;
mod reconcile;
mod worker;

pub use ops::{Diagnostics, RestartSummary};

use crate::runtime::RuntimeTable;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use vcr_core::{
    Clock, Source, SourceId, Subscription, SubscriptionStatus, SystemClock, UserId, WorkerState,
};
use vcr_overseer::{Overseer, OverseerError};
use vcr_storage::{StorageError, Store};

/// Errors surfaced from manager operations, by API-visible kind.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Bad request shape, missing fields, unknown driver.
    #[error("{0}")]
    Validation(String),
    /// Source/subscription/user absent or not visible to the caller.
    #[error("{0}")]
    NotFound(String),
    /// Precondition unmet (reset when not errored, restart-all with no
    /// subscriptions).
    #[error("{0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("overseer unavailable: {0}")]
    Overseer(#[from] OverseerError),
}

/// The control-plane orchestrator.
pub struct Manager<C: Clock = SystemClock> {
    store: Arc<Store<C>>,
    overseer: Arc<dyn Overseer>,
    runtime: RuntimeTable,
    clock: C,
}

impl<C: Clock + 'static> Manager<C> {
    pub fn new(store: Arc<Store<C>>, overseer: Arc<dyn Overseer>, clock: C) -> Self {
        Self { store, overseer, runtime: RuntimeTable::new(), clock }
    }

    pub fn runtime(&self) -> &RuntimeTable {
        &self.runtime
    }

    /// Load runtime entries for every source with at least one active
    /// subscriber, seeding each entry's task binding from the store.
    /// Called once at startup, before the overseer connects.
    pub fn load_runtime(&self) {
        for source in self.store.list_sources() {
            if self.store.active_subscriber_count(source.id) == 0 {
                continue;
            }
            self.ensure_runtime(&source);
        }
    }

    /// Make sure a runtime entry exists for the source and carries its
    /// stored task binding.
    pub(crate) fn ensure_runtime(&self, source: &Source) {
        let entry = self.runtime.entry(source.id);
        let mut e = entry.lock();
        if e.task_id.is_none() {
            if let Some(task_id) = &source.overseer_task_id {
                e.task_id = Some(task_id.clone());
                drop(e);
                self.runtime.bind_task(task_id.clone(), source.id);
            }
        }
    }

    /// Launch a worker start in its own task; user-facing handlers return
    /// after queueing it.
    pub(crate) fn spawn_start(self: &Arc<Self>, source_id: SourceId) {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = mgr.start_worker(source_id).await {
                warn!(source = source_id, %e, "worker start failed");
            }
        });
    }

    // -- lookups --

    pub(crate) fn source_required(&self, source_id: SourceId) -> Result<Source, ManagerError> {
        self.store
            .source(source_id)
            .ok_or_else(|| ManagerError::NotFound(format!("source {source_id} not found")))
    }

    pub(crate) fn source_by_key_required(
        &self,
        driver: &str,
        username: &str,
    ) -> Result<Source, ManagerError> {
        self.store
            .source_by_key(driver, username)
            .ok_or_else(|| ManagerError::NotFound(format!("source {driver}/{username} not found")))
    }

    pub(crate) fn subscription_required(
        &self,
        user_id: UserId,
        source_id: SourceId,
    ) -> Result<Subscription, ManagerError> {
        self.store.subscription(user_id, source_id).ok_or_else(|| {
            ManagerError::NotFound(format!("subscription for source {source_id} not found"))
        })
    }

    pub(crate) fn subscription_by_id_required(
        &self,
        id: vcr_core::SubscriptionId,
    ) -> Result<Subscription, ManagerError> {
        self.store
            .subscription_by_id(id)
            .ok_or_else(|| ManagerError::NotFound(format!("subscription {id} not found")))
    }

    /// Whether the source has at least one active subscriber.
    pub(crate) fn demanded(&self, source_id: SourceId) -> bool {
        self.store.active_subscriber_count(source_id) > 0
    }

    /// Build the status view for a subscription from the store row and a
    /// snapshot of the runtime entry.
    pub(crate) fn status_view(
        &self,
        sub: &Subscription,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let source = self.source_required(sub.source_id)?;
        let config = self.store.config()?;
        let entry = self.runtime.entry(source.id);
        let e = entry.lock();
        Ok(SubscriptionStatus {
            subscription_id: sub.id,
            user_id: sub.user_id,
            source_id: source.id,
            driver: source.driver.clone(),
            username: source.username.clone(),
            posture: sub.posture,
            url: config.canonical_url(&source.driver, &source.username),
            worker_state: e.worker_state,
            pid: e.pid,
            last_error: e.last_error.clone(),
            recording_state: e.recording_state,
            session_active: e.session_active,
            session_started_at: e.session_started_at,
            last_recording_at: e.last_recording_at,
            last_heartbeat_at: e.last_heartbeat_at,
            session_duration: e.session_duration.clone(),
            logs: e.logs.snapshot(),
        })
    }

    /// Snapshot a source's worker state without creating an entry.
    pub(crate) fn worker_state(&self, source_id: SourceId) -> WorkerState {
        self.runtime
            .get(source_id)
            .map(|entry| entry.lock().worker_state)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod fake;

#[cfg(test)]
#[path = "manager_tests/mod.rs"]
mod tests;
