// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable store operations.
//!
//! Serializes with `{"type": "entity:verb", ...fields}` format. Ops carry
//! fully materialized rows (ids already assigned) so replay is a pure
//! function of the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vcr_core::{
    Config, Posture, Session, SessionId, Source, SourceId, Subscription, SubscriptionId, TaskId,
    User, UserId, WorkerEvent,
};

/// One durable mutation of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreOp {
    // -- users --
    #[serde(rename = "user:created")]
    UserCreated { user: User },

    /// Full-row update (password change, role change).
    #[serde(rename = "user:updated")]
    UserUpdated { user: User },

    /// Cascades: the user's sessions and subscriptions are removed.
    #[serde(rename = "user:deleted")]
    UserDeleted { id: UserId },

    // -- auth sessions --
    #[serde(rename = "session:created")]
    SessionCreated { session: Session },

    #[serde(rename = "session:deleted")]
    SessionDeleted { id: SessionId },

    /// Bulk removal of sessions with `expires_at <= cutoff`. The cutoff is
    /// recorded so replay is deterministic.
    #[serde(rename = "session:swept")]
    SessionsSwept { cutoff: DateTime<Utc> },

    // -- sources --
    #[serde(rename = "source:created")]
    SourceCreated { source: Source },

    /// (Re)bind or clear the overseer task id cached on a source.
    #[serde(rename = "source:task-bound")]
    SourceTaskBound {
        id: SourceId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
    },

    // -- subscriptions --
    #[serde(rename = "subscription:created")]
    SubscriptionCreated { subscription: Subscription },

    #[serde(rename = "subscription:posture")]
    SubscriptionPosture {
        id: SubscriptionId,
        posture: Posture,
        at: DateTime<Utc>,
    },

    // -- worker events --
    #[serde(rename = "worker-event:appended")]
    WorkerEventAppended { event: WorkerEvent },

    // -- config --
    #[serde(rename = "config:updated")]
    ConfigUpdated { config: Config },
}
