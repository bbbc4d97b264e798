// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Duration as ChronoDuration;
use std::time::Duration;
use tempfile::tempdir;
use vcr_core::FakeClock;

fn open(dir: &std::path::Path) -> Store<FakeClock> {
    Store::open_with_clock(dir, FakeClock::new()).unwrap()
}

#[test]
fn rows_survive_reopen_via_wal_replay() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        let user = store.create_user("alice", "$hash$", Role::User).unwrap();
        let source = store.get_or_create_source("chaturbate", "bob").unwrap();
        store.upsert_subscription(user.id, source.id).unwrap();
        store.set_source_task_id(source.id, Some(TaskId::new("T1"))).unwrap();
    }

    let store = open(dir.path());
    let user = store.user_by_name("alice").unwrap();
    assert_eq!(user.id, 1);
    let source = store.source_by_key("chaturbate", "bob").unwrap();
    assert_eq!(source.overseer_task_id, Some(TaskId::new("T1")));
    assert_eq!(store.active_subscriber_count(source.id), 1);
}

#[test]
fn rows_survive_reopen_via_snapshot() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        store.create_user("alice", "$hash$", Role::Admin).unwrap();
        store.snapshot_now().unwrap();
        // Post-snapshot writes land in the truncated WAL tail
        store.get_or_create_source("chaturbate", "bob").unwrap();
    }

    let store = open(dir.path());
    assert!(store.user_by_name("alice").is_some());
    assert!(store.source_by_key("chaturbate", "bob").is_some());
}

#[test]
fn get_or_create_source_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());

    let a = store.get_or_create_source("chaturbate", "bob").unwrap();
    let b = store.get_or_create_source("chaturbate", "bob").unwrap();

    assert_eq!(a, b);
    assert_eq!(store.list_sources().len(), 1);
}

#[test]
fn resubscribe_reactivates_archived_row() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let user = store.create_user("alice", "$hash$", Role::User).unwrap();
    let source = store.get_or_create_source("chaturbate", "bob").unwrap();

    let sub = store.upsert_subscription(user.id, source.id).unwrap();
    assert_eq!(sub.posture, Posture::Active);

    store.set_posture(sub.id, Posture::Archived).unwrap();
    assert_eq!(store.active_subscriber_count(source.id), 0);

    let again = store.upsert_subscription(user.id, source.id).unwrap();
    assert_eq!(again.id, sub.id, "no duplicate row");
    assert_eq!(again.posture, Posture::Active);
    assert_eq!(store.list_subscriptions().len(), 1);
}

#[test]
fn upsert_subscription_is_idempotent_when_active() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let user = store.create_user("alice", "$hash$", Role::User).unwrap();
    let source = store.get_or_create_source("chaturbate", "bob").unwrap();

    let a = store.upsert_subscription(user.id, source.id).unwrap();
    let b = store.upsert_subscription(user.id, source.id).unwrap();

    assert_eq!(a, b);
    assert_eq!(store.active_subscriber_count(source.id), 1);
}

#[test]
fn set_posture_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let user = store.create_user("alice", "$hash$", Role::User).unwrap();
    let source = store.get_or_create_source("chaturbate", "bob").unwrap();
    let sub = store.upsert_subscription(user.id, source.id).unwrap();

    let first = store.set_posture(sub.id, Posture::Paused).unwrap();
    let second = store.set_posture(sub.id, Posture::Paused).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.posture, Posture::Paused);
}

#[test]
fn duplicate_username_is_rejected() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store.create_user("alice", "$hash$", Role::User).unwrap();

    match store.create_user("alice", "$other$", Role::User) {
        Err(StorageError::Duplicate(_)) => {}
        other => panic!("expected Duplicate, got {other:?}"),
    }
}

#[test]
fn missing_rows_are_not_found() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());

    assert!(store.user(99).is_none());
    assert!(store.subscription_by_id(99).is_none());
    match store.set_posture(99, Posture::Paused) {
        Err(StorageError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    match store.set_source_task_id(99, None) {
        Err(StorageError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn worker_events_query_newest_first_with_limit() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let source = store.get_or_create_source("chaturbate", "bob").unwrap();

    let clock = FakeClock::new();
    for pid in [1001, 1002, 1003] {
        store
            .append_worker_event(
                source.id,
                pid,
                WorkerEventKind::Started,
                None,
                clock.now_utc() + ChronoDuration::seconds(pid as i64),
            )
            .unwrap();
    }

    let events = store.recent_worker_events(source.id, 2);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].pid, 1003);
    assert_eq!(events[1].pid, 1002);

    assert!(store.recent_worker_events(999, 10).is_empty());
}

#[test]
fn config_seeds_defaults_and_persists_updates() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        let cfg = store.config().unwrap();
        assert_eq!(cfg, Config::default());

        let mut updated = cfg;
        updated.error_threshold = 9;
        store.set_config(updated).unwrap();
    }

    let store = open(dir.path());
    assert_eq!(store.config().unwrap().error_threshold, 9);
}

#[test]
fn sessions_create_lookup_delete() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let store = Store::open_with_clock(dir.path(), clock.clone()).unwrap();
    let user = store.create_user("alice", "$hash$", Role::User).unwrap();

    let session = store
        .create_session(user.id, "tok-1", clock.now_utc() + ChronoDuration::hours(1))
        .unwrap();
    assert_eq!(store.session_by_token("tok-1").unwrap().id, session.id);

    store.delete_session(session.id).unwrap();
    assert!(store.session_by_token("tok-1").is_none());
}

#[test]
fn expired_sessions_are_swept() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let store = Store::open_with_clock(dir.path(), clock.clone()).unwrap();
    let user = store.create_user("alice", "$hash$", Role::User).unwrap();

    store
        .create_session(user.id, "tok-old", clock.now_utc() + ChronoDuration::minutes(30))
        .unwrap();
    store
        .create_session(user.id, "tok-new", clock.now_utc() + ChronoDuration::hours(4))
        .unwrap();

    clock.advance(Duration::from_secs(3600));
    let swept = store.sweep_expired_sessions().unwrap();

    assert_eq!(swept, 1);
    assert!(store.session_by_token("tok-old").is_none());
    assert!(store.session_by_token("tok-new").is_some());
    assert_eq!(store.sweep_expired_sessions().unwrap(), 0);
}

#[test]
fn delete_user_cascades() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let store = Store::open_with_clock(dir.path(), clock.clone()).unwrap();
    let user = store.create_user("alice", "$hash$", Role::User).unwrap();
    let source = store.get_or_create_source("chaturbate", "bob").unwrap();
    store.upsert_subscription(user.id, source.id).unwrap();
    store
        .create_session(user.id, "tok-1", clock.now_utc() + ChronoDuration::hours(1))
        .unwrap();

    store.delete_user(user.id).unwrap();

    assert!(store.user(user.id).is_none());
    assert!(store.session_by_token("tok-1").is_none());
    assert_eq!(store.active_subscriber_count(source.id), 0);
    assert!(store.subscription(user.id, source.id).is_none());
    // Sources are never deleted
    assert!(store.source(source.id).is_some());
}

#[test]
fn ids_are_not_reused_after_delete() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let alice = store.create_user("alice", "$hash$", Role::User).unwrap();
    store.delete_user(alice.id).unwrap();

    let bob = store.create_user("bob", "$hash$", Role::User).unwrap();
    assert!(bob.id > alice.id);
}

#[test]
fn subscribers_of_lists_all_postures() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let alice = store.create_user("alice", "$hash$", Role::User).unwrap();
    let bob = store.create_user("bob", "$hash$", Role::User).unwrap();
    let source = store.get_or_create_source("chaturbate", "carol").unwrap();

    let a = store.upsert_subscription(alice.id, source.id).unwrap();
    store.upsert_subscription(bob.id, source.id).unwrap();
    store.set_posture(a.id, Posture::Paused).unwrap();

    let subscribers = store.subscribers_of(source.id);
    assert_eq!(subscribers.len(), 2);
    assert_eq!(subscribers[0].username, "alice");
    assert_eq!(subscribers[1].username, "bob");
}
