// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vcr-overseer: RPC client for the remote task supervisor.
//!
//! One long-lived WebSocket carries correlated request/response pairs and
//! unsolicited task events. The client reconnects forever with a fixed
//! backoff, fails pending calls on disconnect, and fans events out to a
//! bounded channel consumed by the manager.

mod client;
mod protocol;

pub use client::{OverseerClient, OverseerError, OverseerEvent, StartedTask, Timeouts};
pub use protocol::{
    Frame, OutputStream, PoolStats, Request, RetryPolicy, TaskInfo, TaskState, TaskWorkerState,
};

use async_trait::async_trait;
use std::collections::HashMap;
use vcr_core::TaskId;

/// Adapter seam over the overseer RPC surface.
///
/// The manager talks to this trait so its state machine can be tested
/// against a fake; [`OverseerClient`] is the wire implementation.
#[async_trait]
pub trait Overseer: Send + Sync {
    /// Ask the overseer to run `action` (the driver name) with `params`.
    /// An empty `task_id` lets the overseer assign one.
    async fn start(
        &self,
        task_id: Option<TaskId>,
        action: &str,
        params: HashMap<String, String>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<StartedTask, OverseerError>;

    /// Fire-and-forget stop; there is no success ack.
    async fn stop(&self, task_id: &TaskId) -> Result<(), OverseerError>;

    async fn reset(&self, task_id: &TaskId) -> Result<StartedTask, OverseerError>;

    /// The overseer's authoritative task table.
    async fn list(&self) -> Result<Vec<TaskInfo>, OverseerError>;

    /// Opt in to a task's event stream. Idempotent; required after claiming
    /// a task across a reconnect, since event fan-out is per-subscriber.
    async fn subscribe(&self, task_id: &TaskId) -> Result<(), OverseerError>;

    async fn metrics(&self) -> Result<serde_json::Value, OverseerError>;

    async fn pool_info(&self) -> Result<PoolStats, OverseerError>;

    fn connected(&self) -> bool;
}
