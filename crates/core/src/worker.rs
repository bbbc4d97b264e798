// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker and recording state enums.

use serde::{Deserialize, Serialize};

/// Operational state of the supervised recorder process for a source.
///
/// `errored` is sticky: only an explicit reset clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    #[default]
    Idle,
    Starting,
    Running,
    Errored,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "idle"),
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Errored => write!(f, "errored"),
        }
    }
}

/// Session-level status derived from recorder events, independent of
/// process liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Recording,
    Sleeping,
    Idle,
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::Recording => write!(f, "recording"),
            RecordingState::Sleeping => write!(f, "sleeping"),
            RecordingState::Idle => write!(f, "idle"),
        }
    }
}
