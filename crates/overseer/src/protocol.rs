// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Overseer wire protocol: JSON text frames, case-sensitive fields.
//!
//! Outbound requests carry a client-chosen correlation `id`; responses echo
//! it. Unsolicited events carry no `id`. The `started` frame doubles as the
//! start/reset response (correlated) and as the auto-restart event
//! (uncorrelated, with `restart_of`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vcr_core::TaskId;

/// Supervision policy shipped with a `start` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Seconds between exit and restart.
    pub restart_delay: u64,
    /// Sliding window for counting exits, seconds.
    pub error_window: u64,
    /// Exits within the window before the task is marked errored.
    pub error_threshold: u32,
}

/// Outbound request frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Start {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        action: String,
        params: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_policy: Option<RetryPolicy>,
    },
    Stop {
        id: String,
        task_id: TaskId,
    },
    Reset {
        id: String,
        task_id: TaskId,
    },
    List {
        id: String,
    },
    Metrics {
        id: String,
    },
    PoolInfo {
        id: String,
    },
    Subscribe {
        id: String,
        task_id: TaskId,
    },
}

impl Request {
    /// The correlation id this request was sent with.
    pub fn id(&self) -> &str {
        match self {
            Request::Start { id, .. }
            | Request::Stop { id, .. }
            | Request::Reset { id, .. }
            | Request::List { id }
            | Request::Metrics { id }
            | Request::PoolInfo { id }
            | Request::Subscribe { id, .. } => id,
        }
    }
}

/// Which output stream a recorder line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Overseer-side task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Active,
    Stopped,
    Errored,
}

/// Overseer-side process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskWorkerState {
    Running,
    Exited,
}

/// One row of the overseer's authoritative task table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub action: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    pub state: TaskState,
    pub worker_state: TaskWorkerState,
    #[serde(default)]
    pub current_pid: u32,
    #[serde(default)]
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskInfo {
    pub fn is_running(&self) -> bool {
        self.worker_state == TaskWorkerState::Running
    }

    /// The `source` param (the streamer username), when present.
    pub fn source_param(&self) -> Option<&str> {
        self.params.get("source").map(String::as_str)
    }
}

/// Pool occupancy from a `pool_info` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub limit: u32,
    pub running: u32,
    pub queue_depth: u32,
}

/// Inbound frames: correlated responses and unsolicited events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Start/reset response when `id` is present; auto-restart event when
    /// not (then `restart_of` names the replaced task id).
    Started {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        task_id: TaskId,
        pid: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        restart_of: Option<TaskId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<DateTime<Utc>>,
    },
    Tasks {
        id: String,
        tasks: Vec<TaskInfo>,
    },
    Metrics {
        id: String,
        global: serde_json::Value,
    },
    PoolInfo {
        id: String,
        pool: PoolStats,
    },
    Subscribed {
        id: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        message: String,
    },
    Output {
        task_id: TaskId,
        pid: u32,
        stream: OutputStream,
        data: String,
        ts: DateTime<Utc>,
    },
    Exited {
        task_id: TaskId,
        pid: u32,
        exit_code: i32,
        intentional: bool,
        ts: DateTime<Utc>,
    },
    Restarting {
        task_id: TaskId,
        pid: u32,
        attempt: u32,
        ts: DateTime<Utc>,
    },
    Errored {
        task_id: TaskId,
        pid: u32,
        exit_count: u32,
        ts: DateTime<Utc>,
    },
}

impl Frame {
    /// The correlation id, for frames that complete a pending call.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Frame::Started { id, .. } | Frame::Error { id, .. } => id.as_deref(),
            Frame::Tasks { id, .. }
            | Frame::Metrics { id, .. }
            | Frame::PoolInfo { id, .. }
            | Frame::Subscribed { id } => Some(id),
            Frame::Output { .. }
            | Frame::Exited { .. }
            | Frame::Restarting { .. }
            | Frame::Errored { .. } => None,
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
