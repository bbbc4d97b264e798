// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global configuration blob.
//!
//! Stored as a single JSON document; a fresh store is seeded with
//! [`Config::default`]. Workers pick the config up at start time, so a
//! config change takes effect on the next (re)start of each worker.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Timing policy, recorder parameters, and driver URL templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Delay before the overseer restarts a crashed recorder, seconds.
    #[serde(default = "defaults::restart_delay_secs")]
    pub restart_delay_secs: u64,
    /// Window over which exits are counted toward the error threshold, seconds.
    #[serde(default = "defaults::error_window_secs")]
    pub error_window_secs: u64,
    /// Exits within the window before the overseer marks a task errored.
    #[serde(default = "defaults::error_threshold")]
    pub error_threshold: u32,
    /// Periodic reconcile interval, seconds.
    #[serde(default = "defaults::reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Concurrent worker starts during startup/reconnect batch starts.
    #[serde(default = "defaults::start_concurrency")]
    pub start_concurrency: usize,
    #[serde(default)]
    pub recorder: RecorderParams,
    /// driver name → page URL template; `{username}` is substituted.
    #[serde(default = "defaults::driver_urls")]
    pub driver_urls: HashMap<String, String>,
}

/// Parameters handed to every recorder task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderParams {
    #[serde(default = "defaults::resolution")]
    pub resolution: String,
    #[serde(default = "defaults::framerate")]
    pub framerate: String,
    /// Output path template; `{driver}` and `{username}` are substituted.
    #[serde(default = "defaults::path_template")]
    pub path_template: String,
    /// Segment length passed to the recorder; empty means unsegmented.
    #[serde(default)]
    pub segment_length: String,
    /// How often the recorder polls an offline source, seconds.
    #[serde(default = "defaults::check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub cookies: String,
    #[serde(default)]
    pub user_agent: String,
}

mod defaults {
    use std::collections::HashMap;

    pub(super) fn restart_delay_secs() -> u64 {
        10
    }
    pub(super) fn error_window_secs() -> u64 {
        3600
    }
    pub(super) fn error_threshold() -> u32 {
        5
    }
    pub(super) fn reconcile_interval_secs() -> u64 {
        60
    }
    pub(super) fn start_concurrency() -> usize {
        5
    }
    pub(super) fn resolution() -> String {
        "1080".to_string()
    }
    pub(super) fn framerate() -> String {
        "30".to_string()
    }
    pub(super) fn path_template() -> String {
        "{driver}/{username}/{username}_%Y%m%d_%H%M%S.ts".to_string()
    }
    pub(super) fn check_interval_secs() -> u64 {
        60
    }
    pub(super) fn driver_urls() -> HashMap<String, String> {
        let mut urls = HashMap::new();
        urls.insert(
            "chaturbate".to_string(),
            "https://chaturbate.com/{username}/".to_string(),
        );
        urls
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            restart_delay_secs: defaults::restart_delay_secs(),
            error_window_secs: defaults::error_window_secs(),
            error_threshold: defaults::error_threshold(),
            reconcile_interval_secs: defaults::reconcile_interval_secs(),
            start_concurrency: defaults::start_concurrency(),
            recorder: RecorderParams::default(),
            driver_urls: defaults::driver_urls(),
        }
    }
}

impl Default for RecorderParams {
    fn default() -> Self {
        Self {
            resolution: defaults::resolution(),
            framerate: defaults::framerate(),
            path_template: defaults::path_template(),
            segment_length: String::new(),
            check_interval_secs: defaults::check_interval_secs(),
            cookies: String::new(),
            user_agent: String::new(),
        }
    }
}

impl Config {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Whether a driver name is known (has a URL template).
    pub fn knows_driver(&self, driver: &str) -> bool {
        self.driver_urls.contains_key(driver)
    }

    /// Render the canonical page URL for a source, if the driver is known.
    pub fn canonical_url(&self, driver: &str, username: &str) -> Option<String> {
        self.driver_urls
            .get(driver)
            .map(|tpl| tpl.replace("{username}", username))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
