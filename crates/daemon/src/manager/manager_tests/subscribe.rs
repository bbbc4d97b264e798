// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn fresh_subscribe_creates_rows_and_starts_worker() {
    let ctx = setup();
    let alice = ctx.user("alice");

    let status = ctx.manager.subscribe(alice.id, "chaturbate", "bob").await.unwrap();
    assert_eq!(status.posture, Posture::Active);
    assert_eq!(status.url.as_deref(), Some("https://chaturbate.com/bob/"));
    assert!(!status.session_active);

    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
    ctx.wait_until("worker running", || {
        ctx.manager.worker_state(source.id) == WorkerState::Running
    })
    .await;

    // Exactly one start, addressed by driver/username
    let starts = ctx.overseer.start_calls();
    assert_eq!(starts.len(), 1);
    let (task_id, action, params) = &starts[0];
    assert!(task_id.is_none());
    assert_eq!(action, "chaturbate");
    assert_eq!(params.get("source").map(String::as_str), Some("bob"));
    assert_eq!(params.get("heartbeat_interval").map(String::as_str), Some("30s"));
    assert_eq!(params.get("segment_time").map(String::as_str), Some("0"));

    // The assigned task id is persisted and indexed
    let source = ctx.store.source(source.id).unwrap();
    let bound = source.overseer_task_id.clone().unwrap();
    assert_eq!(ctx.manager.runtime().source_for_task(&bound), Some(source.id));

    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.worker_state, WorkerState::Running);
    assert!(status.pid >= 1000);
}

#[tokio::test]
async fn subscribe_rejects_unknown_driver_and_empty_username() {
    let ctx = setup();
    let alice = ctx.user("alice");

    match ctx.manager.subscribe(alice.id, "nosuch", "bob").await {
        Err(ManagerError::Validation(msg)) => assert!(msg.contains("nosuch")),
        other => panic!("expected Validation, got {other:?}"),
    }
    match ctx.manager.subscribe(alice.id, "chaturbate", "").await {
        Err(ManagerError::Validation(_)) => {}
        other => panic!("expected Validation, got {other:?}"),
    }
    assert!(ctx.overseer.start_calls().is_empty());
}

#[tokio::test]
async fn second_subscriber_does_not_start_twice() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let bob = ctx.user("bob");

    ctx.subscribe_running(alice.id, "chaturbate", "carol").await;
    ctx.manager.subscribe(bob.id, "chaturbate", "carol").await.unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert_eq!(ctx.overseer.start_calls().len(), 1);
    assert_eq!(ctx.store.list_sources().len(), 1);
}

#[tokio::test]
async fn concurrent_subscribes_yield_one_row_and_one_start() {
    let ctx = setup();
    let alice = ctx.user("alice");

    let (a, b) = tokio::join!(
        ctx.manager.subscribe(alice.id, "chaturbate", "bob"),
        ctx.manager.subscribe(alice.id, "chaturbate", "bob"),
    );
    a.unwrap();
    b.unwrap();

    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
    ctx.wait_until("worker running", || {
        ctx.manager.worker_state(source.id) == WorkerState::Running
    })
    .await;
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert_eq!(ctx.store.list_subscriptions().len(), 1);
    assert_eq!(ctx.overseer.start_calls().len(), 1);
}

#[tokio::test]
async fn pause_is_idempotent_and_stops_on_demand_zero() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;

    let first = ctx.manager.pause(alice.id, "chaturbate", "bob").await.unwrap();
    assert_eq!(first.posture, Posture::Paused);
    assert_eq!(ctx.overseer.stop_calls(), vec![task.clone()]);

    // Double pause: no second stop, posture unchanged
    let second = ctx.manager.pause(alice.id, "chaturbate", "bob").await.unwrap();
    assert_eq!(second.posture, Posture::Paused);
    assert_eq!(ctx.overseer.stop_calls().len(), 1);
}

#[tokio::test]
async fn resume_is_idempotent() {
    let ctx = setup();
    let alice = ctx.user("alice");
    ctx.subscribe_running(alice.id, "chaturbate", "bob").await;

    // Resume while already active: no state change, no extra start
    let status = ctx.manager.resume(alice.id, "chaturbate", "bob").await.unwrap();
    assert_eq!(status.posture, Posture::Active);
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(ctx.overseer.start_calls().len(), 1);

    ctx.manager.pause(alice.id, "chaturbate", "bob").await.unwrap();
    ctx.manager.resume(alice.id, "chaturbate", "bob").await.unwrap();
    ctx.wait_until("second start issued", || ctx.overseer.start_calls().len() == 2).await;
}

#[tokio::test]
async fn subscribe_unsubscribe_round_trip_reactivates_same_row() {
    let ctx = setup();
    let alice = ctx.user("alice");
    ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let sub = {
        let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
        ctx.store.subscription(alice.id, source.id).unwrap()
    };

    let archived = ctx.manager.unsubscribe(alice.id, "chaturbate", "bob").await.unwrap();
    assert_eq!(archived.posture, Posture::Archived);

    let back = ctx.manager.subscribe(alice.id, "chaturbate", "bob").await.unwrap();
    assert_eq!(back.posture, Posture::Active);
    assert_eq!(back.subscription_id, sub.id, "same row, no duplicate");
    assert_eq!(ctx.store.list_subscriptions().len(), 1);
}

#[tokio::test]
async fn demand_drop_stops_only_at_zero() {
    let ctx = setup();
    let u1 = ctx.user("u1");
    let u2 = ctx.user("u2");
    let task = ctx.subscribe_running(u1.id, "chaturbate", "a").await;
    ctx.manager.subscribe(u2.id, "chaturbate", "a").await.unwrap();
    let source = ctx.store.source_by_key("chaturbate", "a").unwrap();

    // First subscriber archives: still demanded, worker stays
    ctx.manager.archive(u1.id, "chaturbate", "a").await.unwrap();
    assert!(ctx.overseer.stop_calls().is_empty());
    assert_eq!(ctx.manager.worker_state(source.id), WorkerState::Running);

    // Second subscriber pauses: demand hits zero, stop issued
    ctx.manager.pause(u2.id, "chaturbate", "a").await.unwrap();
    assert_eq!(ctx.overseer.stop_calls(), vec![task.clone()]);

    // Worker state mutates only when the exited event arrives
    assert_eq!(ctx.manager.worker_state(source.id), WorkerState::Running);
    ctx.manager
        .handle_event(OverseerEvent::Exited {
            task_id: task,
            pid: ctx.status(u2.id, "chaturbate", "a").pid,
            exit_code: 0,
            intentional: true,
            ts: ctx.clock.now_utc(),
        })
        .await;
    assert_eq!(ctx.manager.worker_state(source.id), WorkerState::Idle);

    // Audit feed: stopped (intent) then exited, newest first
    let events = ctx.store.recent_worker_events(source.id, 10);
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![vcr_core::WorkerEventKind::Exited, vcr_core::WorkerEventKind::Stopped]
    );
}

#[tokio::test]
async fn list_subscriptions_scopes_by_role() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let bob = ctx.user("bob");
    ctx.manager.subscribe(alice.id, "chaturbate", "a").await.unwrap();
    ctx.manager.subscribe(bob.id, "chaturbate", "b").await.unwrap();

    assert_eq!(ctx.manager.list_subscriptions(alice.id, false).unwrap().len(), 1);
    assert_eq!(ctx.manager.list_subscriptions(alice.id, true).unwrap().len(), 2);
}

#[tokio::test]
async fn logs_and_events_enforce_ownership() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let mallory = ctx.user("mallory");
    ctx.subscribe_running(alice.id, "chaturbate", "bob").await;

    assert!(ctx.manager.get_logs(alice.id, false, "chaturbate", "bob").is_ok());
    match ctx.manager.get_logs(mallory.id, false, "chaturbate", "bob") {
        Err(ManagerError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    // Admin bypasses ownership
    assert!(ctx.manager.get_logs(mallory.id, true, "chaturbate", "bob").is_ok());
    assert!(ctx
        .manager
        .get_worker_events(mallory.id, true, "chaturbate", "bob", 10)
        .is_ok());
}

#[tokio::test]
async fn status_for_unknown_subscription_is_not_found() {
    let ctx = setup();
    let alice = ctx.user("alice");

    match ctx.manager.get_status(alice.id, "chaturbate", "ghost") {
        Err(ManagerError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}
