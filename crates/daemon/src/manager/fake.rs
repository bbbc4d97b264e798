// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake overseer for manager tests: records calls, pops scripted start
//! results, serves a test-controlled task table.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use vcr_core::TaskId;
use vcr_overseer::{
    Overseer, OverseerError, PoolStats, RetryPolicy, StartedTask, TaskInfo, TaskState,
    TaskWorkerState,
};

/// One recorded RPC.
#[derive(Debug, Clone)]
pub enum OverseerCall {
    Start {
        task_id: Option<TaskId>,
        action: String,
        params: HashMap<String, String>,
        retry_policy: Option<RetryPolicy>,
    },
    Stop { task_id: TaskId },
    Reset { task_id: TaskId },
    Subscribe { task_id: TaskId },
    List,
}

pub struct FakeOverseer {
    calls: Mutex<Vec<OverseerCall>>,
    start_results: Mutex<VecDeque<Result<StartedTask, OverseerError>>>,
    tasks: Mutex<Vec<TaskInfo>>,
    connected: AtomicBool,
    next_task: AtomicU32,
}

impl FakeOverseer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            start_results: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            next_task: AtomicU32::new(1),
        })
    }

    /// Script the next start outcome (queued; unscripted starts succeed
    /// with an auto-assigned task id).
    pub fn push_start_result(&self, result: Result<StartedTask, OverseerError>) {
        self.start_results.lock().push_back(result);
    }

    pub fn set_tasks(&self, tasks: Vec<TaskInfo>) {
        *self.tasks.lock() = tasks;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<OverseerCall> {
        self.calls.lock().clone()
    }

    pub fn start_calls(&self) -> Vec<(Option<TaskId>, String, HashMap<String, String>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OverseerCall::Start { task_id, action, params, .. } => {
                    Some((task_id, action, params))
                }
                _ => None,
            })
            .collect()
    }

    pub fn stop_calls(&self) -> Vec<TaskId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OverseerCall::Stop { task_id } => Some(task_id),
                _ => None,
            })
            .collect()
    }

    pub fn subscribe_calls(&self) -> Vec<TaskId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OverseerCall::Subscribe { task_id } => Some(task_id),
                _ => None,
            })
            .collect()
    }

    /// A running TaskInfo row as the overseer would report it.
    pub fn running_task(task_id: &str, pid: u32, action: &str, source: &str) -> TaskInfo {
        TaskInfo {
            task_id: TaskId::new(task_id),
            action: action.to_string(),
            params: HashMap::from([("source".to_string(), source.to_string())]),
            state: TaskState::Active,
            worker_state: TaskWorkerState::Running,
            current_pid: pid,
            restart_count: 0,
            created_at: Utc::now(),
            last_started_at: Some(Utc::now()),
            last_exited_at: None,
            last_exit_code: None,
            error_message: None,
        }
    }
}

#[async_trait]
impl Overseer for FakeOverseer {
    async fn start(
        &self,
        task_id: Option<TaskId>,
        action: &str,
        params: HashMap<String, String>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<StartedTask, OverseerError> {
        self.calls.lock().push(OverseerCall::Start {
            task_id: task_id.clone(),
            action: action.to_string(),
            params,
            retry_policy,
        });
        if let Some(result) = self.start_results.lock().pop_front() {
            return result;
        }
        let n = self.next_task.fetch_add(1, Ordering::SeqCst);
        Ok(StartedTask {
            task_id: task_id.unwrap_or_else(|| TaskId::new(format!("task-{n}"))),
            pid: 1000 + n,
        })
    }

    async fn stop(&self, task_id: &TaskId) -> Result<(), OverseerError> {
        self.calls.lock().push(OverseerCall::Stop { task_id: task_id.clone() });
        Ok(())
    }

    async fn reset(&self, task_id: &TaskId) -> Result<StartedTask, OverseerError> {
        self.calls.lock().push(OverseerCall::Reset { task_id: task_id.clone() });
        let n = self.next_task.fetch_add(1, Ordering::SeqCst);
        Ok(StartedTask { task_id: task_id.clone(), pid: 1000 + n })
    }

    async fn list(&self) -> Result<Vec<TaskInfo>, OverseerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(OverseerError::NotConnected);
        }
        self.calls.lock().push(OverseerCall::List);
        Ok(self.tasks.lock().clone())
    }

    async fn subscribe(&self, task_id: &TaskId) -> Result<(), OverseerError> {
        self.calls.lock().push(OverseerCall::Subscribe { task_id: task_id.clone() });
        Ok(())
    }

    async fn metrics(&self) -> Result<serde_json::Value, OverseerError> {
        Ok(serde_json::json!({}))
    }

    async fn pool_info(&self) -> Result<PoolStats, OverseerError> {
        let running = self.tasks.lock().iter().filter(|t| t.is_running()).count() as u32;
        Ok(PoolStats { limit: 8, running, queue_depth: 0 })
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
