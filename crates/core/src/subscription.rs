// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriptions: a user's declared interest in a source.

use crate::source::SourceId;
use crate::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned subscription id.
pub type SubscriptionId = i64;

/// User-level intent for a subscription.
///
/// A source is *demanded* iff it has at least one `active` subscription.
/// `archived` is terminal for the row until a re-subscribe reactivates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Active,
    Paused,
    Archived,
}

impl std::fmt::Display for Posture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Posture::Active => write!(f, "active"),
            Posture::Paused => write!(f, "paused"),
            Posture::Archived => write!(f, "archived"),
        }
    }
}

/// The `(user, source)` edge. Unique per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub source_id: SourceId,
    pub posture: Posture,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
