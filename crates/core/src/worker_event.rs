// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit rows for recorder process lifecycle.

use crate::source::SourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned worker-event id.
pub type WorkerEventId = i64;

/// What happened to the recorder process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerEventKind {
    /// Process started (or auto-restarted by the overseer).
    Started,
    /// Process exited; `exit_code` carries the status when known.
    Exited,
    /// The manager issued an intentional stop (demand dropped to zero).
    Stopped,
}

impl std::fmt::Display for WorkerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerEventKind::Started => write!(f, "started"),
            WorkerEventKind::Exited => write!(f, "exited"),
            WorkerEventKind::Stopped => write!(f, "stopped"),
        }
    }
}

/// One audit row. Newest-first queries drive the UI events feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEvent {
    pub id: WorkerEventId,
    pub source_id: SourceId,
    pub pid: u32,
    pub kind: WorkerEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub ts: DateTime<Utc>,
}
