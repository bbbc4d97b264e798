// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! View DTOs returned by manager operations.

use crate::source::SourceId;
use crate::subscription::{Posture, SubscriptionId};
use crate::user::UserId;
use crate::worker::{RecordingState, WorkerState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The effective state of one subscription as shown to its user: posture,
/// worker reality, recording-derived session fields, and a log snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    pub subscription_id: SubscriptionId,
    pub user_id: UserId,
    pub source_id: SourceId,
    pub driver: String,
    pub username: String,
    pub posture: Posture,
    /// Canonical page URL rendered from the driver URL template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub worker_state: WorkerState,
    /// Current child pid; 0 when no process is running.
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_state: Option<RecordingState>,
    pub session_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recording_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Recorder-reported duration string, verbatim from the last heartbeat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<String>,
    pub logs: Vec<String>,
}
