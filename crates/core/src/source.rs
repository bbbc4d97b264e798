// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sources: the unit of recording and of overseer task binding.

use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned source id.
pub type SourceId = i64;

/// The durable key of a source: `(driver, username)`.
///
/// The driver doubles as the overseer `action` that picks a recorder handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    pub driver: String,
    pub username: String,
}

impl SourceKey {
    pub fn new(driver: impl Into<String>, username: impl Into<String>) -> Self {
        Self { driver: driver.into(), username: username.into() }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.driver, self.username)
    }
}

/// A remote streamer being recorded.
///
/// Created on first subscribe, never deleted. At most one live overseer task
/// is bound to a source at any time; `overseer_task_id` caches that binding
/// and may be rebound across resets, recoveries, and reconnect discoveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub driver: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overseer_task_id: Option<TaskId>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn key(&self) -> SourceKey {
        SourceKey::new(self.driver.clone(), self.username.clone())
    }
}
