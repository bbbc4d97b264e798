// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Public manager operations: the surface the API layer calls.
//!
//! Every mutation returns the effective subscription status view. Worker
//! starts are queued on background tasks; handlers return immediately.

use super::{Manager, ManagerError};
use std::sync::Arc;
use tracing::{info, warn};
use vcr_core::{
    Clock, Posture, Source, Subscription, SubscriptionId, SubscriptionStatus, User, UserId,
    WorkerEvent, WorkerState,
};
use vcr_overseer::{Overseer, PoolStats, TaskInfo};

/// Outcome of a bulk restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RestartSummary {
    pub restarted: usize,
    pub skipped: usize,
}

/// Overseer-facing health for the admin diagnostics view.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnostics {
    pub overseer_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
}

impl<C: Clock + 'static> Manager<C> {
    // -- user-scoped operations --

    /// Subscribe a user to `(driver, username)`, creating the source on
    /// first subscribe. The worker launches asynchronously when the
    /// active-subscriber count crosses 0 → 1.
    pub async fn subscribe(
        self: &Arc<Self>,
        user_id: UserId,
        driver: &str,
        username: &str,
    ) -> Result<SubscriptionStatus, ManagerError> {
        if driver.is_empty() || username.is_empty() {
            return Err(ManagerError::Validation("driver and username are required".to_string()));
        }
        let config = self.store.config()?;
        if !config.knows_driver(driver) {
            return Err(ManagerError::Validation(format!("unknown driver {driver}")));
        }

        let source = self.store.get_or_create_source(driver, username)?;
        let before = self.store.active_subscriber_count(source.id);
        let sub = self.store.upsert_subscription(user_id, source.id)?;
        self.ensure_runtime(&source);

        if before == 0 && self.demanded(source.id) {
            info!(source = %source.key(), user = user_id, "first active subscriber, launching worker");
            self.spawn_start(source.id);
        }
        self.status_view(&sub)
    }

    /// Archive the subscription (the DELETE form). Stops the worker when
    /// demand reaches zero.
    pub async fn unsubscribe(
        self: &Arc<Self>,
        user_id: UserId,
        driver: &str,
        username: &str,
    ) -> Result<SubscriptionStatus, ManagerError> {
        self.set_posture_for(user_id, driver, username, Posture::Archived).await
    }

    pub async fn archive(
        self: &Arc<Self>,
        user_id: UserId,
        driver: &str,
        username: &str,
    ) -> Result<SubscriptionStatus, ManagerError> {
        self.set_posture_for(user_id, driver, username, Posture::Archived).await
    }

    /// Idempotent for an already-paused subscription.
    pub async fn pause(
        self: &Arc<Self>,
        user_id: UserId,
        driver: &str,
        username: &str,
    ) -> Result<SubscriptionStatus, ManagerError> {
        self.set_posture_for(user_id, driver, username, Posture::Paused).await
    }

    /// Idempotent for an already-active subscription.
    pub async fn resume(
        self: &Arc<Self>,
        user_id: UserId,
        driver: &str,
        username: &str,
    ) -> Result<SubscriptionStatus, ManagerError> {
        self.set_posture_for(user_id, driver, username, Posture::Active).await
    }

    /// Clear a sticky error and relaunch with a fresh task id, so the new
    /// worker picks up current config.
    pub async fn reset_error(
        self: &Arc<Self>,
        user_id: UserId,
        driver: &str,
        username: &str,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let source = self.source_by_key_required(driver, username)?;
        let sub = self.subscription_required(user_id, source.id)?;
        self.reset_error_for(sub).await
    }

    /// Read-only status view. Looks the subscription up by the requester's
    /// own user id; admins inspect other users' rows via the by-id forms.
    pub fn get_status(
        &self,
        user_id: UserId,
        driver: &str,
        username: &str,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let source = self.source_by_key_required(driver, username)?;
        let sub = self.subscription_required(user_id, source.id)?;
        self.status_view(&sub)
    }

    /// All subscriptions visible to the caller: their own, or every row for
    /// admins.
    pub fn list_subscriptions(
        &self,
        user_id: UserId,
        is_admin: bool,
    ) -> Result<Vec<SubscriptionStatus>, ManagerError> {
        let subs = if is_admin {
            self.store.list_subscriptions()
        } else {
            self.store.subscriptions_for_user(user_id)
        };
        subs.iter().map(|sub| self.status_view(sub)).collect()
    }

    /// Log-buffer snapshot, with the ownership check admins bypass.
    pub fn get_logs(
        &self,
        user_id: UserId,
        is_admin: bool,
        driver: &str,
        username: &str,
    ) -> Result<Vec<String>, ManagerError> {
        let source = self.visible_source(user_id, is_admin, driver, username)?;
        Ok(self
            .runtime
            .get(source.id)
            .map(|entry| entry.lock().logs.snapshot())
            .unwrap_or_default())
    }

    /// Worker-event feed, newest first, with the ownership check admins
    /// bypass.
    pub fn get_worker_events(
        &self,
        user_id: UserId,
        is_admin: bool,
        driver: &str,
        username: &str,
        limit: usize,
    ) -> Result<Vec<WorkerEvent>, ManagerError> {
        let source = self.visible_source(user_id, is_admin, driver, username)?;
        Ok(self.store.recent_worker_events(source.id, limit))
    }

    // -- admin operations, by subscription id --

    pub async fn admin_pause(
        self: &Arc<Self>,
        id: SubscriptionId,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let sub = self.subscription_by_id_required(id)?;
        self.apply_posture(sub, Posture::Paused).await
    }

    pub async fn admin_resume(
        self: &Arc<Self>,
        id: SubscriptionId,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let sub = self.subscription_by_id_required(id)?;
        self.apply_posture(sub, Posture::Active).await
    }

    pub async fn admin_archive(
        self: &Arc<Self>,
        id: SubscriptionId,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let sub = self.subscription_by_id_required(id)?;
        self.apply_posture(sub, Posture::Archived).await
    }

    /// The DELETE form: same semantics as archive.
    pub async fn admin_unsubscribe(
        self: &Arc<Self>,
        id: SubscriptionId,
    ) -> Result<SubscriptionStatus, ManagerError> {
        self.admin_archive(id).await
    }

    pub async fn admin_reset_error(
        self: &Arc<Self>,
        id: SubscriptionId,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let sub = self.subscription_by_id_required(id)?;
        self.reset_error_for(sub).await
    }

    /// Stop, clear the task binding, and relaunch one subscription's
    /// source. Errored sources go through reset-error instead.
    pub async fn admin_restart(
        self: &Arc<Self>,
        id: SubscriptionId,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let sub = self.subscription_by_id_required(id)?;
        let source = self.source_required(sub.source_id)?;
        if !self.demanded(source.id) {
            return Err(ManagerError::Conflict(format!(
                "source {}/{} has no active subscribers",
                source.driver, source.username
            )));
        }
        if self.worker_state(source.id) == WorkerState::Errored {
            return Err(ManagerError::Conflict(format!(
                "source {}/{} is errored; reset it instead",
                source.driver, source.username
            )));
        }
        self.restart_source(&source).await?;
        self.status_view(&sub)
    }

    /// Restart every demanded source. Errored sources are skipped unless
    /// `include_errored`; undemanded sources are counted as skipped.
    pub async fn restart_all(
        self: &Arc<Self>,
        include_errored: bool,
    ) -> Result<RestartSummary, ManagerError> {
        if self.store.list_subscriptions().is_empty() {
            return Err(ManagerError::Conflict("no subscriptions to restart".to_string()));
        }
        let mut summary = RestartSummary { restarted: 0, skipped: 0 };
        for source in self.store.list_sources() {
            if !self.demanded(source.id) {
                summary.skipped += 1;
                continue;
            }
            if self.worker_state(source.id) == WorkerState::Errored && !include_errored {
                summary.skipped += 1;
                continue;
            }
            self.restart_source(&source).await?;
            summary.restarted += 1;
        }
        info!(
            restarted = summary.restarted,
            skipped = summary.skipped,
            include_errored,
            "bulk restart complete"
        );
        Ok(summary)
    }

    /// Users subscribed to a source, any posture (admin view).
    pub fn subscribers_of(&self, driver: &str, username: &str) -> Result<Vec<User>, ManagerError> {
        let source = self.source_by_key_required(driver, username)?;
        Ok(self.store.subscribers_of(source.id))
    }

    /// One user's subscriptions as status views (admin view).
    pub fn user_subscriptions(
        &self,
        user_id: UserId,
    ) -> Result<Vec<SubscriptionStatus>, ManagerError> {
        if self.store.user(user_id).is_none() {
            return Err(ManagerError::NotFound(format!("user {user_id} not found")));
        }
        self.store
            .subscriptions_for_user(user_id)
            .iter()
            .map(|sub| self.status_view(sub))
            .collect()
    }

    /// The overseer's raw task table (the workers view). Fails when the
    /// overseer is unavailable — this endpoint strictly needs it.
    pub async fn workers(&self) -> Result<Vec<TaskInfo>, ManagerError> {
        Ok(self.overseer.list().await?)
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        let overseer_connected = self.overseer.connected();
        let (tasks, pool) = if overseer_connected {
            (
                self.overseer.list().await.ok().map(|tasks| tasks.len()),
                self.overseer.pool_info().await.ok(),
            )
        } else {
            (None, None)
        };
        Diagnostics { overseer_connected, tasks, pool }
    }

    // -- shared flows --

    async fn set_posture_for(
        self: &Arc<Self>,
        user_id: UserId,
        driver: &str,
        username: &str,
        posture: Posture,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let source = self.source_by_key_required(driver, username)?;
        let sub = self.subscription_required(user_id, source.id)?;
        self.apply_posture(sub, posture).await
    }

    /// Set a posture and drive the demand transition: 0 → 1 launches the
    /// worker, crossing to 0 stops it.
    pub(crate) async fn apply_posture(
        self: &Arc<Self>,
        sub: Subscription,
        posture: Posture,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let source_id = sub.source_id;
        let before = self.store.active_subscriber_count(source_id);
        let sub = self.store.set_posture(sub.id, posture)?;
        let after = self.store.active_subscriber_count(source_id);

        if before == 0 && after > 0 {
            if let Some(source) = self.store.source(source_id) {
                self.ensure_runtime(&source);
            }
            info!(source = source_id, "demand resumed, launching worker");
            self.spawn_start(source_id);
        } else if before > 0 && after == 0 {
            info!(source = source_id, "demand dropped to zero, stopping worker");
            self.stop_worker(source_id).await;
        }
        self.status_view(&sub)
    }

    /// The reset flow: requires `errored`, stops and forgets the old task,
    /// clears error fields, and relaunches against current config.
    pub(crate) async fn reset_error_for(
        self: &Arc<Self>,
        sub: Subscription,
    ) -> Result<SubscriptionStatus, ManagerError> {
        let source = self.source_required(sub.source_id)?;
        let entry = self.runtime.entry(source.id);
        {
            let e = entry.lock();
            if e.worker_state != WorkerState::Errored {
                return Err(ManagerError::Conflict(format!(
                    "source {}/{} is not in errored state",
                    source.driver, source.username
                )));
            }
        }

        let old = { entry.lock().task_id.take() }.or_else(|| source.overseer_task_id.clone());
        if let Some(old_id) = &old {
            info!(source = %source.key(), task = %old_id, "reset: stopping old task");
            if let Err(e) = self.overseer.stop(old_id).await {
                warn!(source = %source.key(), task = %old_id, %e, "reset: stop failed");
            }
            self.runtime.unbind_task(old_id);
        }
        self.store.set_source_task_id(source.id, None)?;
        {
            let mut e = entry.lock();
            e.worker_state = WorkerState::Idle;
            e.pid = 0;
            e.last_error = None;
            e.logs.push("[system] error reset".to_string());
        }
        self.spawn_start(source.id);
        self.status_view(&sub)
    }

    /// Stop + clear + relaunch, shared by the admin restart forms.
    pub(crate) async fn restart_source(
        self: &Arc<Self>,
        source: &Source,
    ) -> Result<(), ManagerError> {
        let entry = self.runtime.entry(source.id);
        let old = { entry.lock().task_id.take() }.or_else(|| source.overseer_task_id.clone());
        if let Some(old_id) = &old {
            info!(source = %source.key(), task = %old_id, "restart: stopping old task");
            if let Err(e) = self.overseer.stop(old_id).await {
                warn!(source = %source.key(), task = %old_id, %e, "restart: stop failed");
            }
            self.runtime.unbind_task(old_id);
        }
        self.store.set_source_task_id(source.id, None)?;
        {
            let mut e = entry.lock();
            e.worker_state = WorkerState::Idle;
            e.pid = 0;
            e.last_error = None;
        }
        self.spawn_start(source.id);
        Ok(())
    }

    fn visible_source(
        &self,
        user_id: UserId,
        is_admin: bool,
        driver: &str,
        username: &str,
    ) -> Result<Source, ManagerError> {
        let source = self.source_by_key_required(driver, username)?;
        if !is_admin {
            self.subscription_required(user_id, source.id)?;
        }
        Ok(source)
    }
}
