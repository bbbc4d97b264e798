// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Resolve state directory: VCR_STATE_DIR > XDG_STATE_HOME/vcr > ~/.local/state/vcr
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("VCR_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("vcr"));
    }
    let home = dirs::home_dir().ok_or(LifecycleError::NoStateDir)?;
    Ok(home.join(".local/state/vcr"))
}

/// WebSocket URL of the overseer. Required.
pub fn overseer_url() -> Result<String, LifecycleError> {
    std::env::var("VCR_OVERSEER_URL")
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or(LifecycleError::NoOverseerUrl)
}

/// First-boot admin seeding: username plus the pre-hashed password the
/// deployment provides. Both must be set; hashing belongs to the auth
/// collaborator, the daemon stores the value opaquely.
pub fn admin_seed() -> Option<(String, String)> {
    let user = std::env::var("VCR_ADMIN_USER").ok().filter(|s| !s.is_empty())?;
    let hash = std::env::var("VCR_ADMIN_PASS_HASH").ok().filter(|s| !s.is_empty())?;
    Some((user, hash))
}

/// Shutdown drain timeout (default 10s, configurable via `VCR_DRAIN_TIMEOUT_MS`).
pub fn drain_timeout() -> Duration {
    std::env::var("VCR_DRAIN_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(10))
}

/// Tracing filter (default "info", configurable via `VCR_LOG`).
pub fn log_filter() -> String {
    std::env::var("VCR_LOG").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| "info".to_string())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
