// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured events emitted by recorder child processes.
//!
//! Recorders print one JSON object per line on stdout/stderr for state
//! changes; anything that does not parse as a known event is plain log
//! output. The event set is closed, so it is modeled as a tagged enum
//! rather than open string matching.

use serde::{Deserialize, Serialize};

/// One structured recorder event, tagged by the `event` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum RecorderEvent {
    /// A capture segment began. Latches the session active.
    #[serde(rename = "RECORDING START")]
    RecordingStart,

    /// A capture segment ended. Segment boundary only — the session stays
    /// active.
    #[serde(rename = "RECORDING END")]
    RecordingEnd,

    /// The source went offline; the recorder is polling for its return.
    #[serde(rename = "SLEEP")]
    Sleep,

    /// The recorder concluded the session is over.
    #[serde(rename = "SESSION END")]
    SessionEnd,

    /// Periodic liveness signal while capturing.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_duration: Option<String>,
    },
}

impl RecorderEvent {
    /// Parse a single output line. Returns `None` for non-JSON lines and
    /// for JSON that is not a recognized event.
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line.trim()).ok()
    }
}

#[cfg(test)]
#[path = "recorder_tests.rs"]
mod tests;
