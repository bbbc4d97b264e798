// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable store facade.
//!
//! Writers are serialized by the WAL mutex: the op is built against the
//! current state, appended + flushed to the log, then applied in memory.
//! Readers take the state read-lock and never touch the WAL. A snapshot is
//! written every [`SNAPSHOT_EVERY`] ops and on [`Store::snapshot_now`]
//! (clean shutdown); the WAL is truncated after each snapshot.

use crate::op::StoreOp;
use crate::snapshot::{self, SnapshotError};
use crate::state::MaterializedState;
use crate::wal::Wal;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use vcr_core::{
    Clock, Config, Posture, Role, Session, SessionId, Source, SourceId, SourceKey, Subscription,
    SubscriptionId, SystemClock, TaskId, User, UserId, WorkerEvent, WorkerEventKind,
};

/// Ops between automatic snapshots.
const SNAPSHOT_EVERY: u64 = 256;

/// Errors from store operations.
///
/// `NotFound` and `Duplicate` are constraint outcomes, distinguished from
/// infrastructure failures so callers can map them to user-visible errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
}

struct WalInner {
    wal: Wal,
    ops_since_snapshot: u64,
}

/// Durable CRUD for users, sessions, sources, subscriptions, worker events,
/// and the global config blob.
pub struct Store<C: Clock = SystemClock> {
    snapshot_path: PathBuf,
    clock: C,
    state: RwLock<MaterializedState>,
    wal: Mutex<WalInner>,
}

impl Store<SystemClock> {
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        Self::open_with_clock(dir, SystemClock)
    }
}

impl<C: Clock> Store<C> {
    pub fn open_with_clock(dir: &Path, clock: C) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let snapshot_path = dir.join("snapshot.zst");
        let wal_path = dir.join("store.wal");

        let (mut state, covered_seq) = match snapshot::load(&snapshot_path)? {
            Some(snap) => (snap.state, snap.seq),
            None => (MaterializedState::default(), 0),
        };

        let mut wal = Wal::open(&wal_path, covered_seq)?;
        let mut replayed = 0u64;
        while let Some(entry) = wal.next_unprocessed()? {
            state.apply(&entry.op);
            wal.mark_processed(entry.seq);
            replayed += 1;
        }
        if replayed > 0 {
            debug!(replayed, "store: replayed wal tail");
        }

        Ok(Self {
            snapshot_path,
            clock,
            state: RwLock::new(state),
            wal: Mutex::new(WalInner { wal, ops_since_snapshot: replayed }),
        })
    }

    /// Serialize a write: build the op against current state under the WAL
    /// lock, append + flush, then apply. `Ok(None)` from the builder means
    /// the write is a no-op (idempotent call).
    fn commit_with<F>(&self, build: F) -> Result<Option<StoreOp>, StorageError>
    where
        F: FnOnce(&MaterializedState) -> Result<Option<StoreOp>, StorageError>,
    {
        let mut inner = self.wal.lock();
        let op = match build(&self.state.read())? {
            Some(op) => op,
            None => return Ok(None),
        };
        let seq = inner.wal.append(&op)?;
        inner.wal.flush()?;
        self.state.write().apply(&op);
        inner.ops_since_snapshot += 1;
        if inner.ops_since_snapshot >= SNAPSHOT_EVERY {
            self.write_snapshot_locked(&mut inner, seq)?;
        }
        Ok(Some(op))
    }

    fn write_snapshot_locked(
        &self,
        inner: &mut WalInner,
        seq: u64,
    ) -> Result<(), StorageError> {
        let state = self.state.read().clone();
        snapshot::save(&self.snapshot_path, &state, seq, self.clock.now_utc())?;
        inner.wal.truncate()?;
        inner.ops_since_snapshot = 0;
        Ok(())
    }

    /// Write a snapshot immediately (clean shutdown).
    pub fn snapshot_now(&self) -> Result<(), StorageError> {
        let mut inner = self.wal.lock();
        let seq = inner.wal.write_seq();
        self.write_snapshot_locked(&mut inner, seq)
    }

    // -- users --

    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, StorageError> {
        let now = self.clock.now_utc();
        self.commit_with(|state| {
            if state.user_by_name.contains_key(username) {
                return Err(StorageError::Duplicate(format!("user {username} already exists")));
            }
            Ok(Some(StoreOp::UserCreated {
                user: User {
                    id: state.next_user_id.max(1),
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                    role,
                    created_at: now,
                },
            }))
        })?;
        self.user_by_name(username)
            .ok_or_else(|| StorageError::NotFound(format!("user {username}")))
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.state.read().users.get(&id).cloned()
    }

    pub fn user_by_name(&self, username: &str) -> Option<User> {
        let state = self.state.read();
        let id = state.user_by_name.get(username)?;
        state.users.get(id).cloned()
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.state.read().users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn update_user(&self, user: User) -> Result<User, StorageError> {
        self.commit_with(|state| {
            if !state.users.contains_key(&user.id) {
                return Err(StorageError::NotFound(format!("user {}", user.id)));
            }
            Ok(Some(StoreOp::UserUpdated { user: user.clone() }))
        })?;
        Ok(user)
    }

    pub fn delete_user(&self, id: UserId) -> Result<(), StorageError> {
        self.commit_with(|state| {
            if !state.users.contains_key(&id) {
                return Err(StorageError::NotFound(format!("user {id}")));
            }
            Ok(Some(StoreOp::UserDeleted { id }))
        })?;
        Ok(())
    }

    // -- auth sessions --

    pub fn create_session(
        &self,
        user_id: UserId,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, StorageError> {
        let now = self.clock.now_utc();
        self.commit_with(|state| {
            if !state.users.contains_key(&user_id) {
                return Err(StorageError::NotFound(format!("user {user_id}")));
            }
            Ok(Some(StoreOp::SessionCreated {
                session: Session {
                    id: state.next_session_id.max(1),
                    user_id,
                    refresh_token: refresh_token.to_string(),
                    expires_at,
                    created_at: now,
                },
            }))
        })?;
        self.session_by_token(refresh_token)
            .ok_or_else(|| StorageError::NotFound("session".to_string()))
    }

    pub fn session_by_token(&self, refresh_token: &str) -> Option<Session> {
        let state = self.state.read();
        let id = state.session_by_token.get(refresh_token)?;
        state.sessions.get(id).cloned()
    }

    pub fn delete_session(&self, id: SessionId) -> Result<(), StorageError> {
        self.commit_with(|state| {
            if !state.sessions.contains_key(&id) {
                return Err(StorageError::NotFound(format!("session {id}")));
            }
            Ok(Some(StoreOp::SessionDeleted { id }))
        })?;
        Ok(())
    }

    /// Delete all expired sessions. Returns the number removed.
    pub fn sweep_expired_sessions(&self) -> Result<usize, StorageError> {
        let cutoff = self.clock.now_utc();
        let expired = {
            let state = self.state.read();
            state.sessions.values().filter(|s| s.expires_at <= cutoff).count()
        };
        if expired == 0 {
            return Ok(0);
        }
        self.commit_with(|_| Ok(Some(StoreOp::SessionsSwept { cutoff })))?;
        Ok(expired)
    }

    // -- sources --

    /// Idempotent: returns the canonical row whether or not it existed.
    pub fn get_or_create_source(
        &self,
        driver: &str,
        username: &str,
    ) -> Result<Source, StorageError> {
        let key = SourceKey::new(driver, username);
        let now = self.clock.now_utc();
        self.commit_with(|state| {
            if state.source_by_key.contains_key(&key) {
                return Ok(None);
            }
            Ok(Some(StoreOp::SourceCreated {
                source: Source {
                    id: state.next_source_id.max(1),
                    driver: driver.to_string(),
                    username: username.to_string(),
                    overseer_task_id: None,
                    created_at: now,
                },
            }))
        })?;
        self.source_by_key(driver, username)
            .ok_or_else(|| StorageError::NotFound(format!("source {key}")))
    }

    pub fn source(&self, id: SourceId) -> Option<Source> {
        self.state.read().sources.get(&id).cloned()
    }

    pub fn source_by_key(&self, driver: &str, username: &str) -> Option<Source> {
        let state = self.state.read();
        let id = state.source_by_key.get(&SourceKey::new(driver, username))?;
        state.sources.get(id).cloned()
    }

    pub fn list_sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self.state.read().sources.values().cloned().collect();
        sources.sort_by_key(|s| s.id);
        sources
    }

    /// Bind (or clear, with `None`) the cached overseer task id.
    pub fn set_source_task_id(
        &self,
        id: SourceId,
        task_id: Option<TaskId>,
    ) -> Result<(), StorageError> {
        self.commit_with(|state| {
            let source = state
                .sources
                .get(&id)
                .ok_or_else(|| StorageError::NotFound(format!("source {id}")))?;
            if source.overseer_task_id == task_id {
                return Ok(None);
            }
            Ok(Some(StoreOp::SourceTaskBound { id, task_id: task_id.clone() }))
        })?;
        Ok(())
    }

    // -- subscriptions --

    /// Create an active subscription, or reactivate the existing
    /// `(user, source)` row. Never creates a duplicate edge.
    pub fn upsert_subscription(
        &self,
        user_id: UserId,
        source_id: SourceId,
    ) -> Result<Subscription, StorageError> {
        let now = self.clock.now_utc();
        self.commit_with(|state| {
            if !state.users.contains_key(&user_id) {
                return Err(StorageError::NotFound(format!("user {user_id}")));
            }
            if !state.sources.contains_key(&source_id) {
                return Err(StorageError::NotFound(format!("source {source_id}")));
            }
            match state.sub_by_edge.get(&(user_id, source_id)) {
                Some(id) => {
                    let active = state
                        .subscriptions
                        .get(id)
                        .is_some_and(|s| s.posture == Posture::Active);
                    if active {
                        Ok(None)
                    } else {
                        Ok(Some(StoreOp::SubscriptionPosture {
                            id: *id,
                            posture: Posture::Active,
                            at: now,
                        }))
                    }
                }
                None => Ok(Some(StoreOp::SubscriptionCreated {
                    subscription: Subscription {
                        id: state.next_subscription_id.max(1),
                        user_id,
                        source_id,
                        posture: Posture::Active,
                        created_at: now,
                        updated_at: now,
                    },
                })),
            }
        })?;
        self.subscription(user_id, source_id)
            .ok_or_else(|| StorageError::NotFound(format!("subscription {user_id}/{source_id}")))
    }

    pub fn subscription(&self, user_id: UserId, source_id: SourceId) -> Option<Subscription> {
        let state = self.state.read();
        let id = state.sub_by_edge.get(&(user_id, source_id))?;
        state.subscriptions.get(id).cloned()
    }

    pub fn subscription_by_id(&self, id: SubscriptionId) -> Option<Subscription> {
        self.state.read().subscriptions.get(&id).cloned()
    }

    pub fn subscriptions_for_user(&self, user_id: UserId) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .state
            .read()
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    /// Active subscriptions across all users.
    pub fn list_active_subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .state
            .read()
            .subscriptions
            .values()
            .filter(|s| s.posture == Posture::Active)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    pub fn list_subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> =
            self.state.read().subscriptions.values().cloned().collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    /// Idempotent posture change.
    pub fn set_posture(
        &self,
        id: SubscriptionId,
        posture: Posture,
    ) -> Result<Subscription, StorageError> {
        let now = self.clock.now_utc();
        self.commit_with(|state| {
            let sub = state
                .subscriptions
                .get(&id)
                .ok_or_else(|| StorageError::NotFound(format!("subscription {id}")))?;
            if sub.posture == posture {
                return Ok(None);
            }
            Ok(Some(StoreOp::SubscriptionPosture { id, posture, at: now }))
        })?;
        self.subscription_by_id(id)
            .ok_or_else(|| StorageError::NotFound(format!("subscription {id}")))
    }

    pub fn active_subscriber_count(&self, source_id: SourceId) -> usize {
        self.state.read().active_subscriber_count(source_id)
    }

    /// Users holding any subscription to the source, for the admin
    /// subscribers view.
    pub fn subscribers_of(&self, source_id: SourceId) -> Vec<User> {
        let state = self.state.read();
        let mut users: Vec<User> = state
            .subscriptions
            .values()
            .filter(|s| s.source_id == source_id)
            .filter_map(|s| state.users.get(&s.user_id).cloned())
            .collect();
        users.sort_by_key(|u| u.id);
        users.dedup_by_key(|u| u.id);
        users
    }

    // -- worker events --

    pub fn append_worker_event(
        &self,
        source_id: SourceId,
        pid: u32,
        kind: WorkerEventKind,
        exit_code: Option<i32>,
        ts: DateTime<Utc>,
    ) -> Result<WorkerEvent, StorageError> {
        let op = self.commit_with(|state| {
            if !state.sources.contains_key(&source_id) {
                return Err(StorageError::NotFound(format!("source {source_id}")));
            }
            Ok(Some(StoreOp::WorkerEventAppended {
                event: WorkerEvent {
                    id: state.next_worker_event_id.max(1),
                    source_id,
                    pid,
                    kind,
                    exit_code,
                    ts,
                },
            }))
        })?;
        match op {
            Some(StoreOp::WorkerEventAppended { event }) => Ok(event),
            _ => Err(StorageError::NotFound(format!("source {source_id}"))),
        }
    }

    /// Latest worker events for a source, newest first.
    pub fn recent_worker_events(&self, source_id: SourceId, limit: usize) -> Vec<WorkerEvent> {
        let state = self.state.read();
        let Some(feed) = state.worker_events.get(&source_id) else {
            return Vec::new();
        };
        feed.iter().rev().take(limit).cloned().collect()
    }

    // -- config --

    /// Read the global config, seeding (and persisting) defaults on first
    /// read of an empty store.
    pub fn config(&self) -> Result<Config, StorageError> {
        if let Some(cfg) = self.state.read().config.clone() {
            return Ok(cfg);
        }
        self.commit_with(|state| {
            if state.config.is_some() {
                return Ok(None);
            }
            Ok(Some(StoreOp::ConfigUpdated { config: Config::default() }))
        })?;
        Ok(self.state.read().config.clone().unwrap_or_default())
    }

    pub fn set_config(&self, config: Config) -> Result<(), StorageError> {
        self.commit_with(|_| Ok(Some(StoreOp::ConfigUpdated { config: config.clone() })))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
