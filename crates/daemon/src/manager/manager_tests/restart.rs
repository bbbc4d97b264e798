// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use vcr_core::WorkerState;
use vcr_overseer::{OverseerError, StartedTask};

async fn make_errored(ctx: &TestCtx, task: &TaskId) {
    ctx.manager
        .handle_event(OverseerEvent::Errored {
            task_id: task.clone(),
            pid: 0,
            exit_count: 5,
            ts: ctx.clock.now_utc(),
        })
        .await;
}

#[tokio::test]
async fn reset_error_stops_old_task_and_relaunches_fresh() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let old_task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
    make_errored(&ctx, &old_task).await;

    ctx.manager.reset_error(alice.id, "chaturbate", "bob").await.unwrap();

    ctx.wait_until("fresh start", || ctx.overseer.start_calls().len() == 2).await;
    ctx.wait_until("running", || ctx.manager.worker_state(source.id) == WorkerState::Running)
        .await;

    // Old task stopped and forgotten everywhere
    assert_eq!(ctx.overseer.stop_calls(), vec![old_task.clone()]);
    assert_eq!(ctx.manager.runtime().source_for_task(&old_task), None);
    let new_task = ctx.store.source(source.id).unwrap().overseer_task_id.unwrap();
    assert_ne!(new_task, old_task);

    // The retry went out with an empty task id so the overseer assigns fresh
    let starts = ctx.overseer.start_calls();
    assert!(starts[1].0.is_none());

    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.worker_state, WorkerState::Running);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn reset_error_requires_errored_state() {
    let ctx = setup();
    let alice = ctx.user("alice");
    ctx.subscribe_running(alice.id, "chaturbate", "bob").await;

    match ctx.manager.reset_error(alice.id, "chaturbate", "bob").await {
        Err(ManagerError::Conflict(msg)) => {
            assert_eq!(msg, "source chaturbate/bob is not in errored state");
        }
        other => panic!("expected Conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn admin_reset_error_by_subscription_id() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
    let sub = ctx.store.subscription(alice.id, source.id).unwrap();
    make_errored(&ctx, &task).await;

    ctx.manager.admin_reset_error(sub.id).await.unwrap();

    ctx.wait_until("running again", || {
        ctx.manager.worker_state(source.id) == WorkerState::Running
    })
    .await;
    assert_eq!(ctx.overseer.stop_calls(), vec![task]);
}

#[tokio::test]
async fn already_running_recovery_stops_clears_and_retries_once() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let old_task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    // The daemon lost track (say, a crash): force idle while the overseer
    // still runs the old task.
    {
        let entry = ctx.manager.runtime().entry(source.id);
        let mut e = entry.lock();
        e.worker_state = WorkerState::Idle;
        e.pid = 0;
    }
    ctx.overseer.push_start_result(Err(OverseerError::Remote(format!(
        "task {old_task} is already running"
    ))));
    ctx.overseer
        .push_start_result(Ok(StartedTask { task_id: TaskId::new("T2"), pid: 2002 }));

    ctx.manager.start_worker(source.id).await.unwrap();

    // Exactly one stop of the stale id and one retried start with none
    assert_eq!(ctx.overseer.stop_calls(), vec![old_task.clone()]);
    let starts = ctx.overseer.start_calls();
    assert_eq!(starts.len(), 3); // subscribe, rejected, retry
    assert_eq!(starts[1].0.as_ref(), Some(&old_task));
    assert!(starts[2].0.is_none());

    assert_eq!(ctx.store.source(source.id).unwrap().overseer_task_id, Some(TaskId::new("T2")));
    assert_eq!(ctx.manager.runtime().source_for_task(&TaskId::new("T2")), Some(source.id));
    assert_eq!(ctx.manager.runtime().source_for_task(&old_task), None);
    assert_eq!(ctx.manager.worker_state(source.id), WorkerState::Running);
}

#[tokio::test]
async fn failed_start_leaves_source_idle_for_reconcile() {
    let ctx = setup();
    let alice = ctx.user("alice");

    ctx.overseer.push_start_result(Err(OverseerError::Timeout(Duration::from_secs(20))));
    ctx.manager.subscribe(alice.id, "chaturbate", "bob").await.unwrap();
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    ctx.wait_until("attempted", || !ctx.overseer.start_calls().is_empty()).await;
    ctx.wait_until("settled idle", || {
        ctx.manager.worker_state(source.id) == WorkerState::Idle
    })
    .await;

    let logs = ctx.manager.get_logs(alice.id, false, "chaturbate", "bob").unwrap();
    assert!(logs.iter().any(|l| l.starts_with("[system] start failed:")), "{logs:?}");
}

#[tokio::test]
async fn restart_all_excludes_errored_and_undemanded() {
    let ctx = setup();
    let alice = ctx.user("alice");

    // A: running; B: errored; C: paused (undemanded)
    let task_a = ctx.subscribe_running(alice.id, "chaturbate", "a").await;
    let task_b = ctx.subscribe_running(alice.id, "chaturbate", "b").await;
    ctx.subscribe_running(alice.id, "chaturbate", "c").await;
    make_errored(&ctx, &task_b).await;
    ctx.manager.pause(alice.id, "chaturbate", "c").await.unwrap();

    let summary = ctx.manager.restart_all(false).await.unwrap();
    assert_eq!(summary, RestartSummary { restarted: 1, skipped: 2 });

    // A was stopped, cleared, and relaunched
    assert!(ctx.overseer.stop_calls().contains(&task_a));
    let source_a = ctx.store.source_by_key("chaturbate", "a").unwrap();
    ctx.wait_until("a running again", || {
        ctx.manager.worker_state(source_a.id) == WorkerState::Running
    })
    .await;

    // B untouched, still errored; C untouched
    assert_eq!(ctx.worker_state_of("chaturbate", "b"), WorkerState::Errored);
    assert!(!ctx.overseer.stop_calls().contains(&task_b));
}

#[tokio::test]
async fn restart_all_can_include_errored() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task_b = ctx.subscribe_running(alice.id, "chaturbate", "b").await;
    make_errored(&ctx, &task_b).await;

    let summary = ctx.manager.restart_all(true).await.unwrap();
    assert_eq!(summary, RestartSummary { restarted: 1, skipped: 0 });

    let source = ctx.store.source_by_key("chaturbate", "b").unwrap();
    ctx.wait_until("b running again", || {
        ctx.manager.worker_state(source.id) == WorkerState::Running
    })
    .await;
    assert!(ctx.overseer.stop_calls().contains(&task_b));
}

#[tokio::test]
async fn restart_all_with_no_subscriptions_conflicts() {
    let ctx = setup();
    match ctx.manager.restart_all(false).await {
        Err(ManagerError::Conflict(_)) => {}
        other => panic!("expected Conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn admin_posture_ops_mirror_user_forms() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
    let sub = ctx.store.subscription(alice.id, source.id).unwrap();

    let paused = ctx.manager.admin_pause(sub.id).await.unwrap();
    assert_eq!(paused.posture, Posture::Paused);
    assert_eq!(ctx.overseer.stop_calls(), vec![task]);

    let resumed = ctx.manager.admin_resume(sub.id).await.unwrap();
    assert_eq!(resumed.posture, Posture::Active);
    ctx.wait_until("relaunched", || ctx.overseer.start_calls().len() == 2).await;

    let archived = ctx.manager.admin_archive(sub.id).await.unwrap();
    assert_eq!(archived.posture, Posture::Archived);

    match ctx.manager.admin_pause(9999).await {
        Err(ManagerError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn admin_restart_rejects_errored_and_undemanded() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
    let sub = ctx.store.subscription(alice.id, source.id).unwrap();

    // Healthy + demanded: restart works
    ctx.manager.admin_restart(sub.id).await.unwrap();
    ctx.wait_until("restarted", || ctx.overseer.start_calls().len() == 2).await;
    ctx.wait_until("running", || ctx.manager.worker_state(source.id) == WorkerState::Running)
        .await;

    // Errored: directed to reset-error instead
    let current = ctx.store.source(source.id).unwrap().overseer_task_id.unwrap();
    make_errored(&ctx, &current).await;
    match ctx.manager.admin_restart(sub.id).await {
        Err(ManagerError::Conflict(msg)) => assert!(msg.contains("reset")),
        other => panic!("expected Conflict, got {other:?}"),
    }

    // Undemanded: conflict as well
    let ctx2 = setup();
    let carol = ctx2.user("carol");
    ctx2.subscribe_running(carol.id, "chaturbate", "x").await;
    ctx2.manager.pause(carol.id, "chaturbate", "x").await.unwrap();
    let source2 = ctx2.store.source_by_key("chaturbate", "x").unwrap();
    let sub2 = ctx2.store.subscription(carol.id, source2.id).unwrap();
    match ctx2.manager.admin_restart(sub2.id).await {
        Err(ManagerError::Conflict(_)) => {}
        other => panic!("expected Conflict, got {other:?}"),
    }
    let _ = task;
}

#[tokio::test]
async fn diagnostics_reports_overseer_health() {
    let ctx = setup();
    ctx.overseer.set_tasks(vec![FakeOverseer::running_task("T1", 1001, "chaturbate", "a")]);

    let diag = ctx.manager.diagnostics().await;
    assert!(diag.overseer_connected);
    assert_eq!(diag.tasks, Some(1));
    assert_eq!(diag.pool.map(|p| p.running), Some(1));

    ctx.overseer.set_connected(false);
    let diag = ctx.manager.diagnostics().await;
    assert!(!diag.overseer_connected);
    assert!(diag.tasks.is_none());

    match ctx.manager.workers().await {
        Err(ManagerError::Overseer(_)) => {}
        other => panic!("expected Overseer error, got {other:?}"),
    }
}

#[tokio::test]
async fn user_subscriptions_and_subscribers_views() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let bob = ctx.user("bob");
    ctx.manager.subscribe(alice.id, "chaturbate", "carol").await.unwrap();
    ctx.manager.subscribe(bob.id, "chaturbate", "carol").await.unwrap();

    let views = ctx.manager.user_subscriptions(alice.id).unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].username, "carol");

    let subscribers = ctx.manager.subscribers_of("chaturbate", "carol").unwrap();
    assert_eq!(subscribers.len(), 2);

    match ctx.manager.user_subscriptions(999) {
        Err(ManagerError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}
