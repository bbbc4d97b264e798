// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The WebSocket client behind the [`Overseer`] trait.
//!
//! One connection at a time: a writer task serializes outbound frames, the
//! read loop is single-threaded and dispatches correlated responses to
//! pending oneshots and unsolicited frames to the event channel. Dispatch
//! never does unbounded work on the read path — callbacks are a bounded
//! channel send. On disconnect every pending call fails with
//! [`OverseerError::ConnectionLost`] and the connect loop retries forever.

use crate::protocol::{Frame, OutputStream, PoolStats, Request, RetryPolicy, TaskInfo};
use crate::Overseer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vcr_core::{IdGen, NanoIdGen, TaskId};

/// Outbound queue depth per connection.
const OUTBOUND_BUFFER: usize = 64;

/// Errors from overseer RPC operations
#[derive(Debug, Error)]
pub enum OverseerError {
    #[error("not connected to overseer")]
    NotConnected,
    #[error("connection lost")]
    ConnectionLost,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("overseer error: {0}")]
    Remote(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl OverseerError {
    /// The overseer rejected a start because the task is already running.
    /// Recovered by stopping the stale task id and retrying with a fresh one.
    pub fn is_already_running(&self) -> bool {
        matches!(self, OverseerError::Remote(m) if m.contains("already running"))
    }
}

/// Successful `start`/`reset` outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedTask {
    pub task_id: TaskId,
    pub pid: u32,
}

/// Unsolicited overseer activity, fanned out to the manager.
#[derive(Debug, Clone)]
pub enum OverseerEvent {
    /// A connection was (re)established. The consumer runs the on-connect
    /// reconcile in its own task.
    Connected,
    Started {
        task_id: TaskId,
        pid: u32,
        restart_of: Option<TaskId>,
        ts: DateTime<Utc>,
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

/// Per-call deadlines and the reconnect backoff.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// `start` completion deadline.
    pub start: Duration,
    /// Deadline for list/metrics/pool_info/reset/subscribe.
    pub rpc: Duration,
    /// Fixed delay between dial attempts.
    pub reconnect_delay: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            start: Duration::from_secs(20),
            rpc: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Auto-reconnecting, correlation-multiplexed overseer RPC client.
pub struct OverseerClient {
    url: String,
    timeouts: Timeouts,
    idgen: NanoIdGen,
    connected: AtomicBool,
    /// Correlation id → waiter. Cleared (dropping the senders) on disconnect.
    pending: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
    /// Writer handle for the current connection, if any.
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    events_tx: mpsc::Sender<OverseerEvent>,
}

impl OverseerClient {
    pub fn new(url: impl Into<String>, events_tx: mpsc::Sender<OverseerEvent>) -> Self {
        Self::with_timeouts(url, events_tx, Timeouts::default())
    }

    pub fn with_timeouts(
        url: impl Into<String>,
        events_tx: mpsc::Sender<OverseerEvent>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            url: url.into(),
            timeouts,
            idgen: NanoIdGen,
            connected: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            outbound: Mutex::new(None),
            events_tx,
        }
    }

    /// Connect loop: dial, serve the connection, back off, repeat. Exits on
    /// cancellation.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match tokio_tungstenite::connect_async(self.url.as_str()).await {
                Ok((ws, _)) => {
                    info!(url = %self.url, "overseer: connected");
                    self.serve_connection(ws, &shutdown).await;
                    self.disconnected();
                    if shutdown.is_cancelled() {
                        break;
                    }
                    warn!(url = %self.url, "overseer: connection lost, will reconnect");
                }
                Err(e) => {
                    debug!(url = %self.url, %e, "overseer: connect failed");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.timeouts.reconnect_delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        self.disconnected();
    }

    async fn serve_connection<S>(
        &self,
        ws: tokio_tungstenite::WebSocketStream<S>,
        shutdown: &CancellationToken,
    ) where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        *self.outbound.lock() = Some(out_tx);
        self.connected.store(true, Ordering::SeqCst);

        // The on-connected hook runs through the event channel so the
        // consumer reconciles off the read path.
        let _ = self.events_tx.send(OverseerEvent::Connected).await;

        // Writer task: the single place that touches the sink, so frames
        // are never interleaved.
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(%e, "overseer: read error");
                        break;
                    }
                    _ => {} // Ping/Pong/Binary — ignore
                },
                _ = shutdown.cancelled() => break,
            }
        }

        writer.abort();
    }

    fn disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.lock() = None;
        // Dropping the waiters completes every in-flight call with
        // ConnectionLost.
        self.pending.lock().clear();
    }

    async fn dispatch(&self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%e, "overseer: unparseable frame");
                return;
            }
        };

        if let Some(id) = frame.correlation_id().map(str::to_string) {
            let waiter = self.pending.lock().remove(&id);
            match (waiter, frame) {
                (Some(tx), frame) => {
                    let _ = tx.send(frame);
                }
                (None, Frame::Error { message, .. }) => {
                    warn!(id = %id, %message, "overseer: error with no pending call");
                }
                (None, frame) => {
                    debug!(id = %id, ?frame, "overseer: response with no pending call");
                }
            }
            return;
        }

        if let Some(event) = event_from(frame) {
            let _ = self.events_tx.send(event).await;
        }
    }

    async fn send(&self, req: &Request) -> Result<(), OverseerError> {
        let tx = self.outbound.lock().clone().ok_or(OverseerError::NotConnected)?;
        let text =
            serde_json::to_string(req).map_err(|e| OverseerError::Protocol(e.to_string()))?;
        tx.send(Message::Text(text.into()))
            .await
            .map_err(|_| OverseerError::NotConnected)
    }

    async fn request(&self, req: Request, timeout: Duration) -> Result<Frame, OverseerError> {
        let id = req.id().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        if let Err(e) = self.send(&req).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let frame = match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.pending.lock().remove(&id);
                return Err(OverseerError::Timeout(timeout));
            }
            Ok(Err(_)) => return Err(OverseerError::ConnectionLost),
            Ok(Ok(frame)) => frame,
        };

        if let Frame::Error { message, .. } = frame {
            return Err(OverseerError::Remote(message));
        }
        Ok(frame)
    }
}

fn event_from(frame: Frame) -> Option<OverseerEvent> {
    match frame {
        Frame::Started { task_id, pid, restart_of, ts, .. } => Some(OverseerEvent::Started {
            task_id,
            pid,
            restart_of,
            ts: ts.unwrap_or_else(Utc::now),
        }),
        Frame::Output { task_id, pid, stream, data, ts } => {
            Some(OverseerEvent::Output { task_id, pid, stream, data, ts })
        }
        Frame::Exited { task_id, pid, exit_code, intentional, ts } => {
            Some(OverseerEvent::Exited { task_id, pid, exit_code, intentional, ts })
        }
        Frame::Restarting { task_id, pid, attempt, ts } => {
            Some(OverseerEvent::Restarting { task_id, pid, attempt, ts })
        }
        Frame::Errored { task_id, pid, exit_count, ts } => {
            Some(OverseerEvent::Errored { task_id, pid, exit_count, ts })
        }
        // Correlated-only frames never reach here
        _ => None,
    }
}

#[async_trait]
impl Overseer for OverseerClient {
    async fn start(
        &self,
        task_id: Option<TaskId>,
        action: &str,
        params: HashMap<String, String>,
        retry_policy: Option<RetryPolicy>,
    ) -> Result<StartedTask, OverseerError> {
        let req = Request::Start {
            id: self.idgen.id("req"),
            task_id,
            action: action.to_string(),
            params,
            retry_policy,
        };
        match self.request(req, self.timeouts.start).await? {
            Frame::Started { task_id, pid, .. } => Ok(StartedTask { task_id, pid }),
            other => Err(OverseerError::Protocol(format!("unexpected start response: {other:?}"))),
        }
    }

    async fn stop(&self, task_id: &TaskId) -> Result<(), OverseerError> {
        // Fire-and-forget: no success ack; the id is only for tracing error
        // responses in the overseer's logs.
        self.send(&Request::Stop { id: self.idgen.id("req"), task_id: task_id.clone() }).await
    }

    async fn reset(&self, task_id: &TaskId) -> Result<StartedTask, OverseerError> {
        let req = Request::Reset { id: self.idgen.id("req"), task_id: task_id.clone() };
        match self.request(req, self.timeouts.rpc).await? {
            Frame::Started { task_id, pid, .. } => Ok(StartedTask { task_id, pid }),
            other => Err(OverseerError::Protocol(format!("unexpected reset response: {other:?}"))),
        }
    }

    async fn list(&self) -> Result<Vec<TaskInfo>, OverseerError> {
        let req = Request::List { id: self.idgen.id("req") };
        match self.request(req, self.timeouts.rpc).await? {
            Frame::Tasks { tasks, .. } => Ok(tasks),
            other => Err(OverseerError::Protocol(format!("unexpected list response: {other:?}"))),
        }
    }

    async fn subscribe(&self, task_id: &TaskId) -> Result<(), OverseerError> {
        let req = Request::Subscribe { id: self.idgen.id("req"), task_id: task_id.clone() };
        match self.request(req, self.timeouts.rpc).await? {
            Frame::Subscribed { .. } => Ok(()),
            other => {
                Err(OverseerError::Protocol(format!("unexpected subscribe response: {other:?}")))
            }
        }
    }

    async fn metrics(&self) -> Result<serde_json::Value, OverseerError> {
        let req = Request::Metrics { id: self.idgen.id("req") };
        match self.request(req, self.timeouts.rpc).await? {
            Frame::Metrics { global, .. } => Ok(global),
            other => {
                Err(OverseerError::Protocol(format!("unexpected metrics response: {other:?}")))
            }
        }
    }

    async fn pool_info(&self) -> Result<PoolStats, OverseerError> {
        let req = Request::PoolInfo { id: self.idgen.id("req") };
        match self.request(req, self.timeouts.rpc).await? {
            Frame::PoolInfo { pool, .. } => Ok(pool),
            other => {
                Err(OverseerError::Protocol(format!("unexpected pool_info response: {other:?}")))
            }
        }
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
