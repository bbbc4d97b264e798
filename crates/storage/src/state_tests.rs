// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::op::StoreOp;
use chrono::{TimeZone, Utc};
use vcr_core::{Posture, Role, Session, Source, Subscription, TaskId, User, WorkerEvent};
use yare::parameterized;

fn ts(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn user(id: i64, name: &str) -> User {
    User {
        id,
        username: name.to_string(),
        password_hash: "$opaque$".to_string(),
        role: Role::User,
        created_at: ts(0),
    }
}

fn source(id: i64, username: &str) -> Source {
    Source {
        id,
        driver: "chaturbate".to_string(),
        username: username.to_string(),
        overseer_task_id: None,
        created_at: ts(0),
    }
}

fn sub(id: i64, user_id: i64, source_id: i64, posture: Posture) -> Subscription {
    Subscription { id, user_id, source_id, posture, created_at: ts(0), updated_at: ts(0) }
}

#[test]
fn apply_is_idempotent_for_creates() {
    let mut state = MaterializedState::default();
    let op = StoreOp::UserCreated { user: user(1, "alice") };
    state.apply(&op);
    state.apply(&op);

    assert_eq!(state.users.len(), 1);
    assert_eq!(state.next_user_id, 2);
    assert_eq!(state.user_by_name.get("alice"), Some(&1));
}

#[test]
fn user_delete_cascades_sessions_and_subscriptions() {
    let mut state = MaterializedState::default();
    state.apply(&StoreOp::UserCreated { user: user(1, "alice") });
    state.apply(&StoreOp::UserCreated { user: user(2, "bob") });
    state.apply(&StoreOp::SourceCreated { source: source(1, "carol") });
    state.apply(&StoreOp::SessionCreated {
        session: Session {
            id: 1,
            user_id: 1,
            refresh_token: "tok-a".to_string(),
            expires_at: ts(3600),
            created_at: ts(0),
        },
    });
    state.apply(&StoreOp::SubscriptionCreated { subscription: sub(1, 1, 1, Posture::Active) });
    state.apply(&StoreOp::SubscriptionCreated { subscription: sub(2, 2, 1, Posture::Active) });

    state.apply(&StoreOp::UserDeleted { id: 1 });

    assert!(state.users.get(&1).is_none());
    assert!(state.sessions.is_empty());
    assert!(state.session_by_token.is_empty());
    assert_eq!(state.subscriptions.len(), 1);
    assert_eq!(state.active_subscriber_count(1), 1);
    assert!(state.sub_by_edge.get(&(1, 1)).is_none());
    assert!(state.sub_by_edge.get(&(2, 1)).is_some());
}

#[test]
fn session_sweep_uses_recorded_cutoff() {
    let mut state = MaterializedState::default();
    state.apply(&StoreOp::UserCreated { user: user(1, "alice") });
    for (id, expiry) in [(1, 10), (2, 100)] {
        state.apply(&StoreOp::SessionCreated {
            session: Session {
                id,
                user_id: 1,
                refresh_token: format!("tok-{id}"),
                expires_at: ts(expiry),
                created_at: ts(0),
            },
        });
    }

    state.apply(&StoreOp::SessionsSwept { cutoff: ts(50) });

    assert!(state.sessions.get(&1).is_none());
    assert!(state.sessions.get(&2).is_some());
    assert!(state.session_by_token.get("tok-1").is_none());
    assert!(state.session_by_token.get("tok-2").is_some());
}

#[test]
fn task_binding_sets_and_clears() {
    let mut state = MaterializedState::default();
    state.apply(&StoreOp::SourceCreated { source: source(1, "carol") });

    state.apply(&StoreOp::SourceTaskBound { id: 1, task_id: Some(TaskId::new("T1")) });
    assert_eq!(
        state.sources.get(&1).and_then(|s| s.overseer_task_id.clone()),
        Some(TaskId::new("T1"))
    );

    state.apply(&StoreOp::SourceTaskBound { id: 1, task_id: None });
    assert!(state.sources.get(&1).and_then(|s| s.overseer_task_id.clone()).is_none());
}

#[test]
fn posture_change_updates_row_and_timestamps() {
    let mut state = MaterializedState::default();
    state.apply(&StoreOp::UserCreated { user: user(1, "alice") });
    state.apply(&StoreOp::SourceCreated { source: source(1, "carol") });
    state.apply(&StoreOp::SubscriptionCreated { subscription: sub(1, 1, 1, Posture::Active) });

    state.apply(&StoreOp::SubscriptionPosture { id: 1, posture: Posture::Paused, at: ts(5) });

    let row = state.subscriptions.get(&1).unwrap();
    assert_eq!(row.posture, Posture::Paused);
    assert_eq!(row.updated_at, ts(5));
    assert_eq!(state.active_subscriber_count(1), 0);
}

#[parameterized(
    active = { Posture::Active, 1 },
    paused = { Posture::Paused, 0 },
    archived = { Posture::Archived, 0 },
)]
fn only_active_postures_count_as_demand(posture: Posture, expected: usize) {
    let mut state = MaterializedState::default();
    state.apply(&StoreOp::UserCreated { user: user(1, "alice") });
    state.apply(&StoreOp::SourceCreated { source: source(1, "carol") });
    state.apply(&StoreOp::SubscriptionCreated { subscription: sub(1, 1, 1, posture) });

    assert_eq!(state.active_subscriber_count(1), expected);
}

#[test]
fn worker_event_feed_is_append_ordered_and_bounded() {
    let mut state = MaterializedState::default();
    state.apply(&StoreOp::SourceCreated { source: source(1, "carol") });

    for id in 1..=(MAX_EVENTS_PER_SOURCE as i64 + 10) {
        state.apply(&StoreOp::WorkerEventAppended {
            event: WorkerEvent {
                id,
                source_id: 1,
                pid: 1000,
                kind: vcr_core::WorkerEventKind::Started,
                exit_code: None,
                ts: ts(id),
            },
        });
    }

    let feed = state.worker_events.get(&1).unwrap();
    assert_eq!(feed.len(), MAX_EVENTS_PER_SOURCE);
    // Oldest entries were evicted
    assert_eq!(feed.first().map(|e| e.id), Some(11));
    assert_eq!(feed.last().map(|e| e.id), Some(MAX_EVENTS_PER_SOURCE as i64 + 10));
}

#[test]
fn duplicate_worker_event_is_not_reappended() {
    let mut state = MaterializedState::default();
    state.apply(&StoreOp::SourceCreated { source: source(1, "carol") });
    let op = StoreOp::WorkerEventAppended {
        event: WorkerEvent {
            id: 1,
            source_id: 1,
            pid: 1000,
            kind: vcr_core::WorkerEventKind::Exited,
            exit_code: Some(0),
            ts: ts(1),
        },
    };
    state.apply(&op);
    state.apply(&op);

    assert_eq!(state.worker_events.get(&1).map(Vec::len), Some(1));
}

#[test]
fn rebuild_indices_restores_lookups() {
    let mut state = MaterializedState::default();
    state.apply(&StoreOp::UserCreated { user: user(1, "alice") });
    state.apply(&StoreOp::SourceCreated { source: source(1, "carol") });
    state.apply(&StoreOp::SubscriptionCreated { subscription: sub(1, 1, 1, Posture::Active) });

    // Simulate snapshot round-trip losing skipped fields
    let json = serde_json::to_string(&state).unwrap();
    let mut restored: MaterializedState = serde_json::from_str(&json).unwrap();
    assert!(restored.source_by_key.is_empty());

    restored.rebuild_indices();

    assert_eq!(
        restored.source_by_key.get(&vcr_core::SourceKey::new("chaturbate", "carol")),
        Some(&1)
    );
    assert_eq!(restored.sub_by_edge.get(&(1, 1)), Some(&1));
    assert_eq!(restored.user_by_name.get("alice"), Some(&1));
}
