// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

mod sources;
mod subscriptions;
mod users;

use crate::op::StoreOp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vcr_core::{
    Config, Session, SessionId, Source, SourceId, SourceKey, Subscription, SubscriptionId, User,
    UserId, WorkerEvent,
};

/// Retention cap for the in-memory worker-event feed, per source. The audit
/// feed is queried bounded-latest, so only the tail is kept.
pub(crate) const MAX_EVENTS_PER_SOURCE: usize = 500;

/// Materialized state built from store-op replay.
///
/// Row maps are persisted in snapshots; the keyed lookup indices are
/// rebuilt on load. Id counters persist so deleted ids are never reused.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub users: HashMap<UserId, User>,
    pub sessions: HashMap<SessionId, Session>,
    pub sources: HashMap<SourceId, Source>,
    pub subscriptions: HashMap<SubscriptionId, Subscription>,
    /// Append-ordered per source; newest entries at the back.
    pub worker_events: HashMap<SourceId, Vec<WorkerEvent>>,
    pub config: Option<Config>,

    #[serde(default)]
    pub(crate) next_user_id: i64,
    #[serde(default)]
    pub(crate) next_session_id: i64,
    #[serde(default)]
    pub(crate) next_source_id: i64,
    #[serde(default)]
    pub(crate) next_subscription_id: i64,
    #[serde(default)]
    pub(crate) next_worker_event_id: i64,

    /// `(driver, username)` → source id. Unique.
    #[serde(skip)]
    pub(crate) source_by_key: HashMap<SourceKey, SourceId>,
    /// `(user, source)` → subscription id. Unique.
    #[serde(skip)]
    pub(crate) sub_by_edge: HashMap<(UserId, SourceId), SubscriptionId>,
    #[serde(skip)]
    pub(crate) user_by_name: HashMap<String, UserId>,
    #[serde(skip)]
    pub(crate) session_by_token: HashMap<String, SessionId>,
}

impl MaterializedState {
    /// Apply an operation to derive state changes.
    ///
    /// # Idempotency Requirement
    ///
    /// **All op handlers MUST be idempotent.** Applying the same op twice
    /// must produce the same state as applying it once: ops may be applied
    /// once on the write path and again during WAL replay after a crash
    /// that lost the snapshot but not the log.
    ///
    /// Guidelines:
    /// - Use assignment (`=`) instead of mutation (`+=`)
    /// - Guard appends with an id existence check
    /// - Advance id counters with `max`, never increment
    pub fn apply(&mut self, op: &StoreOp) {
        match op {
            StoreOp::UserCreated { .. }
            | StoreOp::UserUpdated { .. }
            | StoreOp::UserDeleted { .. }
            | StoreOp::SessionCreated { .. }
            | StoreOp::SessionDeleted { .. }
            | StoreOp::SessionsSwept { .. } => users::apply(self, op),

            StoreOp::SourceCreated { .. }
            | StoreOp::SourceTaskBound { .. }
            | StoreOp::WorkerEventAppended { .. } => sources::apply(self, op),

            StoreOp::SubscriptionCreated { .. } | StoreOp::SubscriptionPosture { .. } => {
                subscriptions::apply(self, op)
            }

            StoreOp::ConfigUpdated { config } => {
                self.config = Some(config.clone());
            }
        }
    }

    /// Rebuild the skipped lookup indices from the row maps (after snapshot
    /// load).
    pub fn rebuild_indices(&mut self) {
        self.source_by_key =
            self.sources.values().map(|s| (s.key(), s.id)).collect();
        self.sub_by_edge = self
            .subscriptions
            .values()
            .map(|s| ((s.user_id, s.source_id), s.id))
            .collect();
        self.user_by_name =
            self.users.values().map(|u| (u.username.clone(), u.id)).collect();
        self.session_by_token = self
            .sessions
            .values()
            .map(|s| (s.refresh_token.clone(), s.id))
            .collect();
    }

    /// Number of subscriptions with posture `active` for a source. The
    /// source is *demanded* when this is non-zero.
    pub fn active_subscriber_count(&self, source_id: SourceId) -> usize {
        self.subscriptions
            .values()
            .filter(|s| s.source_id == source_id && s.posture == vcr_core::Posture::Active)
            .count()
    }
}

pub(crate) fn advance(counter: &mut i64, used_id: i64) {
    *counter = (*counter).max(used_id + 1);
}

#[cfg(test)]
#[path = "../state_tests.rs"]
mod tests;
