// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Duration as ChronoDuration;
use vcr_core::{RecordingState, WorkerEventKind};
use vcr_overseer::OutputStream;

fn output(task: &TaskId, pid: u32, data: &str, ts: chrono::DateTime<chrono::Utc>) -> OverseerEvent {
    OverseerEvent::Output {
        task_id: task.clone(),
        pid,
        stream: OutputStream::Stdout,
        data: data.to_string(),
        ts,
    }
}

#[tokio::test]
async fn segment_boundary_does_not_end_session() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let pid = ctx.status(alice.id, "chaturbate", "bob").pid;

    let t0 = ctx.clock.now_utc();
    ctx.manager
        .handle_event(output(&task, pid, r#"{"event":"RECORDING START"}"#, t0))
        .await;
    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.recording_state, Some(RecordingState::Recording));
    assert!(status.session_active);
    assert_eq!(status.session_started_at, Some(t0));
    assert_eq!(status.last_recording_at, Some(t0));

    let t_hb = t0 + ChronoDuration::seconds(30);
    ctx.manager
        .handle_event(output(&task, pid, r#"{"event":"HEARTBEAT","session_duration":"00:00:30"}"#, t_hb))
        .await;
    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.last_heartbeat_at, Some(t_hb));
    assert_eq!(status.session_duration.as_deref(), Some("00:00:30"));

    // Segment ends: recording goes idle but the session survives
    let t1 = t0 + ChronoDuration::seconds(90);
    ctx.manager.handle_event(output(&task, pid, r#"{"event":"RECORDING END"}"#, t1)).await;
    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.recording_state, Some(RecordingState::Idle));
    assert!(status.session_active);
    assert_eq!(status.session_started_at, Some(t0));

    // Next segment: anchor unchanged
    let t2 = t1 + ChronoDuration::seconds(1);
    ctx.manager.handle_event(output(&task, pid, r#"{"event":"RECORDING START"}"#, t2)).await;
    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.recording_state, Some(RecordingState::Recording));
    assert!(status.session_active);
    assert_eq!(status.session_started_at, Some(t0), "session anchor must not move");
    assert_eq!(status.last_recording_at, Some(t2));
}

#[tokio::test]
async fn sleep_keeps_session_session_end_clears_it() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let pid = ctx.status(alice.id, "chaturbate", "bob").pid;
    let t0 = ctx.clock.now_utc();

    ctx.manager.handle_event(output(&task, pid, r#"{"event":"RECORDING START"}"#, t0)).await;
    ctx.manager.handle_event(output(&task, pid, r#"{"event":"SLEEP"}"#, t0)).await;
    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.recording_state, Some(RecordingState::Sleeping));
    assert!(status.session_active, "sleep is not a session end");

    ctx.manager.handle_event(output(&task, pid, r#"{"event":"SESSION END"}"#, t0)).await;
    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.recording_state, Some(RecordingState::Idle));
    assert!(!status.session_active);
    assert!(status.session_started_at.is_none());
}

#[tokio::test]
async fn non_json_output_only_lands_in_the_log_buffer() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let pid = ctx.status(alice.id, "chaturbate", "bob").pid;

    ctx.manager
        .handle_event(OverseerEvent::Output {
            task_id: task.clone(),
            pid,
            stream: OutputStream::Stderr,
            data: "opening stream...\n".to_string(),
            ts: ctx.clock.now_utc(),
        })
        .await;

    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert!(status.logs.iter().any(|l| l == "[stderr] opening stream..."));
    assert!(status.recording_state.is_none());
    assert!(!status.session_active);
}

#[tokio::test]
async fn exited_for_stale_pid_keeps_state_but_audits() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
    let live_pid = ctx.status(alice.id, "chaturbate", "bob").pid;

    ctx.manager
        .handle_event(OverseerEvent::Exited {
            task_id: task,
            pid: live_pid + 7,
            exit_code: 1,
            intentional: false,
            ts: ctx.clock.now_utc(),
        })
        .await;

    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.worker_state, WorkerState::Running);
    assert_eq!(status.pid, live_pid);

    let events = ctx.store.recent_worker_events(source.id, 5);
    assert_eq!(events.first().map(|e| e.kind), Some(WorkerEventKind::Exited));
    assert_eq!(events.first().and_then(|e| e.exit_code), Some(1));
}

#[tokio::test]
async fn unexpected_exit_clears_session_and_goes_idle() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let pid = ctx.status(alice.id, "chaturbate", "bob").pid;
    let t0 = ctx.clock.now_utc();

    ctx.manager.handle_event(output(&task, pid, r#"{"event":"RECORDING START"}"#, t0)).await;
    ctx.manager
        .handle_event(OverseerEvent::Exited {
            task_id: task,
            pid,
            exit_code: 137,
            intentional: false,
            ts: t0,
        })
        .await;

    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.worker_state, WorkerState::Idle);
    assert_eq!(status.pid, 0);
    assert!(status.recording_state.is_none());
    assert!(!status.session_active);
    assert!(status.logs.iter().any(|l| l == "[system] exited code=137"));
}

#[tokio::test]
async fn restart_event_logs_old_pid_and_audits_once() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();
    let old_pid = ctx.status(alice.id, "chaturbate", "bob").pid;

    ctx.manager
        .handle_event(OverseerEvent::Restarting {
            task_id: task.clone(),
            pid: old_pid,
            attempt: 2,
            ts: ctx.clock.now_utc(),
        })
        .await;
    ctx.manager
        .handle_event(OverseerEvent::Started {
            task_id: task.clone(),
            pid: old_pid + 1,
            restart_of: Some(task.clone()),
            ts: ctx.clock.now_utc(),
        })
        .await;

    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.pid, old_pid + 1);
    assert!(status.logs.iter().any(|l| l == "[system] restarting (attempt 2)"));
    assert!(status.logs.iter().any(|l| l == &format!("[system] restarted (was {old_pid})")));

    let started: Vec<_> = ctx
        .store
        .recent_worker_events(source.id, 10)
        .into_iter()
        .filter(|e| e.kind == WorkerEventKind::Started)
        .collect();
    assert_eq!(started.len(), 1, "restart_of must not duplicate the audit row");
}

#[tokio::test]
async fn errored_event_is_sticky_until_reset() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    ctx.manager
        .handle_event(OverseerEvent::Errored {
            task_id: task,
            pid: 0,
            exit_count: 5,
            ts: ctx.clock.now_utc(),
        })
        .await;

    let status = ctx.status(alice.id, "chaturbate", "bob");
    assert_eq!(status.worker_state, WorkerState::Errored);
    assert_eq!(status.last_error.as_deref(), Some("error threshold reached after 5 exits"));

    // Neither a direct start nor a periodic reconcile may relaunch it
    ctx.manager.start_worker(source.id).await.unwrap();
    ctx.manager.reconcile_once().await;
    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(ctx.manager.worker_state(source.id), WorkerState::Errored);
    assert_eq!(ctx.overseer.start_calls().len(), 1);
}

#[tokio::test]
async fn events_for_unknown_tasks_are_dropped() {
    let ctx = setup();
    let alice = ctx.user("alice");
    ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let source = ctx.store.source_by_key("chaturbate", "bob").unwrap();

    ctx.manager
        .handle_event(OverseerEvent::Started {
            task_id: TaskId::new("ghost"),
            pid: 4242,
            restart_of: None,
            ts: ctx.clock.now_utc(),
        })
        .await;

    assert_ne!(ctx.status(alice.id, "chaturbate", "bob").pid, 4242);
    assert!(ctx
        .store
        .recent_worker_events(source.id, 10)
        .iter()
        .all(|e| e.pid != 4242));
}

#[tokio::test]
async fn log_buffer_stays_bounded_under_output_flood() {
    let ctx = setup();
    let alice = ctx.user("alice");
    let task = ctx.subscribe_running(alice.id, "chaturbate", "bob").await;
    let pid = ctx.status(alice.id, "chaturbate", "bob").pid;

    for i in 0..300 {
        ctx.manager
            .handle_event(output(&task, pid, &format!("line {i}"), ctx.clock.now_utc()))
            .await;
    }

    let logs = ctx.manager.get_logs(alice.id, false, "chaturbate", "bob").unwrap();
    assert_eq!(logs.len(), crate::runtime::LOG_BUFFER_CAP);
    assert_eq!(logs.last().map(String::as_str), Some("[stdout] line 299"));
}
