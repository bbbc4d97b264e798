// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use vcr_core::WorkerState;

#[tokio::test]
async fn reconnect_claims_running_tasks_and_starts_the_rest() {
    let ctx = setup();
    let alice = ctx.user("alice");

    // Two sources already running with bound tasks
    let task_a = ctx.subscribe_running(alice.id, "chaturbate", "a").await;
    let task_b = ctx.subscribe_running(alice.id, "chaturbate", "b").await;

    // A third demanded source whose initial start failed
    ctx.overseer.push_start_result(Err(vcr_overseer::OverseerError::Timeout(
        Duration::from_secs(20),
    )));
    ctx.manager.subscribe(alice.id, "chaturbate", "c").await.unwrap();
    let source_c = ctx.store.source_by_key("chaturbate", "c").unwrap();
    ctx.wait_until("c start attempted", || ctx.overseer.start_calls().len() == 3).await;
    ctx.wait_until("c settles idle", || {
        ctx.manager.worker_state(source_c.id) == WorkerState::Idle
    })
    .await;

    // The overseer still runs a and b; simulate the reconnect
    ctx.overseer.set_tasks(vec![
        FakeOverseer::running_task(task_a.as_str(), 1001, "chaturbate", "a"),
        FakeOverseer::running_task(task_b.as_str(), 1002, "chaturbate", "b"),
    ]);
    ctx.manager.handle_event(OverseerEvent::Connected).await;

    ctx.wait_until("c started", || {
        ctx.manager.worker_state(source_c.id) == WorkerState::Running
    })
    .await;

    // a and b were claimed, not restarted: one start each from the original
    // subscribe, plus exactly one more for c
    assert_eq!(ctx.overseer.start_calls().len(), 4);
    let subs = ctx.overseer.subscribe_calls();
    assert!(subs.contains(&task_a) && subs.contains(&task_b));

    for name in ["a", "b"] {
        let logs = ctx.manager.get_logs(alice.id, false, "chaturbate", name).unwrap();
        assert!(
            logs.iter().any(|l| l.starts_with("[system] claimed running task=")),
            "{name} should log the claim: {logs:?}"
        );
    }
}

#[tokio::test]
async fn claim_rebinds_a_changed_task_id() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let old_task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    // Simulate a reconnect where the overseer rebuilt the task under a new id
    ctx.overseer.set_tasks(vec![FakeOverseer::running_task("T9", 2002, "chaturbate", "bob")]);
    // Runtime thinks it is running under the old id; reconnect must rebind
    ctx.manager.reconcile_on_connect().await;

    let source = ctx.store.source(source.id).unwrap();
    assert_eq!(source.overseer_task_id, Some(TaskId::new("T9")));
    assert_eq!(ctx.manager.runtime().source_for_task(&TaskId::new("T9")), Some(source.id));
    assert_eq!(ctx.status(alice.id, "chaturbate", "bob").pid, 2002);
    // No restart happened
    assert_eq!(ctx.overseer.start_calls().len(), 1);
    let _ = old_task;
}

#[tokio::test]
async fn reconnect_resets_stale_running_entry_before_fresh_start() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    // Overseer came back empty: the task is gone
    ctx.overseer.set_tasks(Vec::new());
    ctx.manager.reconcile_on_connect().await;

    ctx.wait_until("restarted", || ctx.overseer.start_calls().len() == 2).await;
    ctx.wait_until("running again", || {
        ctx.manager.worker_state(source.id) == WorkerState::Running
    })
    .await;
    let _ = task;
}

#[tokio::test]
async fn reconnect_skips_errored_sources() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;

    ctx.manager
        .handle_event(OverseerEvent::Errored {
            task_id: task,
            pid: 0,
            exit_count: 5,
            ts: ctx.clock.now_utc(),
        })
        .await;

    ctx.overseer.set_tasks(Vec::new());
    ctx.manager.reconcile_on_connect().await;
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert_eq!(ctx.worker_state_of("chaturbate", "bob"), WorkerState::Errored);
    assert_eq!(ctx.overseer.start_calls().len(), 1, "errored sources need an explicit reset");
}

#[tokio::test]
async fn reconnect_normalizes_undemanded_sources_without_starting() {
    let ctx = setup();
    let alice = ctx.user("alice");
    ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    ctx.manager.pause(alice.id, "chaturbate", "bob").await.unwrap();
    // Pretend the stop never landed: no exited event, no live task
    ctx.overseer.set_tasks(Vec::new());
    ctx.manager.reconcile_on_connect().await;
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert_eq!(ctx.manager.worker_state(source.id), WorkerState::Idle);
    assert_eq!(ctx.overseer.start_calls().len(), 1, "undemanded sources are not started");
}

#[tokio::test]
async fn reconnect_stops_live_task_of_undemanded_source() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    ctx.manager.pause(alice.id, "chaturbate", "bob").await.unwrap();
    assert_eq!(ctx.overseer.stop_calls().len(), 1);

    // The overseer still reports the task running after a reconnect
    ctx.overseer
        .set_tasks(vec![FakeOverseer::running_task(task.as_str(), 1001, "chaturbate", "bob")]);
    ctx.manager.reconcile_on_connect().await;
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert_eq!(ctx.overseer.stop_calls().len(), 2, "stop is re-issued");
    assert_eq!(ctx.manager.worker_state(source.id), WorkerState::Idle);
    assert_eq!(ctx.overseer.start_calls().len(), 1);
}

#[tokio::test]
async fn periodic_restarts_vanished_tasks() {
    let ctx = setup();
    let alice = ctx.user("alice");
    ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    ctx.overseer.set_tasks(Vec::new());
    ctx.manager.reconcile_once().await;

    ctx.wait_until("fresh start", || ctx.overseer.start_calls().len() == 2).await;
    ctx.wait_until("running", || ctx.manager.worker_state(source.id) == WorkerState::Running)
        .await;
}

#[tokio::test]
async fn periodic_claims_matching_task_for_idle_demanded_source() {
    let ctx = setup();
    let alice = ctx.user("alice");

    // Subscribe with a failing start so the source settles idle
    ctx.overseer
        .push_start_result(Err(vcr_overseer::OverseerError::Remote("pool full".to_string())));
    ctx.manager.subscribe(alice.id, "chaturbate", "bob").await.unwrap();
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
    ctx.wait_until("start attempted", || !ctx.overseer.start_calls().is_empty()).await;
    ctx.wait_until("idle", || ctx.manager.worker_state(source.id) == WorkerState::Idle).await;

    // Meanwhile the overseer does have a running recorder for this key
    ctx.overseer.set_tasks(vec![FakeOverseer::running_task("T5", 1234, "chaturbate", "bob")]);
    ctx.manager.reconcile_once().await;

    assert_eq!(ctx.manager.worker_state(source.id), WorkerState::Running);
    let bound = ctx.store.source(source.id).unwrap().overseer_task_id;
    assert_eq!(bound, Some(TaskId::new("T5")));
    assert_eq!(ctx.overseer.subscribe_calls(), vec![TaskId::new("T5")]);
    // Claimed, not restarted
    assert_eq!(ctx.overseer.start_calls().len(), 1);
}

#[tokio::test]
async fn periodic_skips_while_disconnected() {
    let ctx = setup();
    let alice = ctx.user("alice");
    ctx.subscribe_running(alice.id, "chaturbate", "bob").await;

    ctx.overseer.set_connected(false);
    ctx.overseer.set_tasks(Vec::new());
    let before = ctx.overseer.calls().len();
    ctx.manager.reconcile_once().await;

    assert_eq!(ctx.overseer.calls().len(), before, "no RPCs while disconnected");
}

#[tokio::test]
async fn task_index_matches_stored_binding_after_reconcile() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    ctx.overseer
        .set_tasks(vec![FakeOverseer::running_task(task.as_str(), 1001, "chaturbate", "bob")]);
    ctx.manager.reconcile_on_connect().await;

    let stored = ctx.store.source(source.id).unwrap().overseer_task_id.unwrap();
    assert_eq!(ctx.manager.runtime().source_for_task(&stored), Some(source.id));
}
