// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

fn test_timeouts() -> Timeouts {
    Timeouts {
        start: Duration::from_millis(500),
        rpc: Duration::from_millis(300),
        reconnect_delay: Duration::from_millis(50),
    }
}

async fn start_client(
    url: String,
) -> (Arc<OverseerClient>, mpsc::Receiver<OverseerEvent>, CancellationToken) {
    let (events_tx, events_rx) = mpsc::channel(64);
    let client = Arc::new(OverseerClient::with_timeouts(url, events_tx, test_timeouts()));
    let token = CancellationToken::new();
    tokio::spawn(client.clone().run(token.clone()));
    (client, events_rx, token)
}

async fn expect_connected(events: &mut mpsc::Receiver<OverseerEvent>) {
    match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(OverseerEvent::Connected)) => {}
        other => panic!("expected Connected event, got {other:?}"),
    }
}

fn text_frame(frame: &Frame) -> Message {
    Message::Text(serde_json::to_string(frame).unwrap().into())
}

#[tokio::test]
async fn start_round_trips_with_correlation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Request = serde_json::from_str(text.as_str()).unwrap();
            if let Request::Start { id, task_id, action, params, retry_policy } = req {
                assert!(task_id.is_none());
                assert_eq!(action, "chaturbate");
                assert_eq!(params.get("source").map(String::as_str), Some("bob"));
                assert_eq!(retry_policy.map(|r| r.error_threshold), Some(5));
                let resp = Frame::Started {
                    id: Some(id),
                    task_id: TaskId::new("T1"),
                    pid: 1001,
                    restart_of: None,
                    ts: None,
                };
                ws.send(text_frame(&resp)).await.unwrap();
                break;
            }
        }
    });

    let (client, mut events, token) = start_client(format!("ws://{addr}")).await;
    expect_connected(&mut events).await;

    let started = client
        .start(
            None,
            "chaturbate",
            HashMap::from([("source".to_string(), "bob".to_string())]),
            Some(RetryPolicy { restart_delay: 10, error_window: 3600, error_threshold: 5 }),
        )
        .await
        .unwrap();

    assert_eq!(started, StartedTask { task_id: TaskId::new("T1"), pid: 1001 });
    assert!(client.connected());

    token.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn remote_error_is_categorized() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Request = serde_json::from_str(text.as_str()).unwrap();
            let resp = Frame::Error {
                id: Some(req.id().to_string()),
                message: "task chaturbate/bob is already running".to_string(),
            };
            ws.send(text_frame(&resp)).await.unwrap();
            break;
        }
    });

    let (client, mut events, token) = start_client(format!("ws://{addr}")).await;
    expect_connected(&mut events).await;

    let err = client.start(None, "chaturbate", HashMap::new(), None).await.unwrap_err();
    assert!(err.is_already_running(), "got {err:?}");

    token.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn unsolicited_events_reach_the_channel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ts = chrono::Utc::now();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(text_frame(&Frame::Output {
            task_id: TaskId::new("T1"),
            pid: 1001,
            stream: OutputStream::Stdout,
            data: "{\"event\":\"RECORDING START\"}".to_string(),
            ts,
        }))
        .await
        .unwrap();
        ws.send(text_frame(&Frame::Exited {
            task_id: TaskId::new("T1"),
            pid: 1001,
            exit_code: 0,
            intentional: true,
            ts,
        }))
        .await
        .unwrap();
        // Hold the connection open until the client saw both events
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let (_client, mut events, token) = start_client(format!("ws://{addr}")).await;
    expect_connected(&mut events).await;

    match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(OverseerEvent::Output { task_id, data, .. })) => {
            assert_eq!(task_id, TaskId::new("T1"));
            assert!(data.contains("RECORDING START"));
        }
        other => panic!("expected Output, got {other:?}"),
    }
    match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(OverseerEvent::Exited { exit_code, intentional, .. })) => {
            assert_eq!(exit_code, 0);
            assert!(intentional);
        }
        other => panic!("expected Exited, got {other:?}"),
    }

    token.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn silent_server_times_out_the_call() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // Swallow the request and say nothing
        let _ = ws.next().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let (client, mut events, token) = start_client(format!("ws://{addr}")).await;
    expect_connected(&mut events).await;

    match client.list().await {
        Err(OverseerError::Timeout(_)) => {}
        other => panic!("expected Timeout, got {other:?}"),
    }

    token.cancel();
    server.abort();
}

#[tokio::test]
async fn disconnect_fails_pending_calls_with_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        // Read the request, then drop the connection without answering
        let _ = ws.next().await;
    });

    let (client, mut events, token) = start_client(format!("ws://{addr}")).await;
    expect_connected(&mut events).await;

    match client.list().await {
        Err(OverseerError::ConnectionLost) => {}
        other => panic!("expected ConnectionLost, got {other:?}"),
    }

    token.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn reconnects_after_connection_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First connection: accept and immediately drop
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        drop(ws);

        // Second connection: answer a subscribe
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Request = serde_json::from_str(text.as_str()).unwrap();
            if let Request::Subscribe { id, task_id } = req {
                assert_eq!(task_id, TaskId::new("T1"));
                ws.send(text_frame(&Frame::Subscribed { id })).await.unwrap();
                break;
            }
        }
    });

    let (client, mut events, token) = start_client(format!("ws://{addr}")).await;
    expect_connected(&mut events).await;
    // Second Connected arrives after the automatic reconnect
    expect_connected(&mut events).await;

    client.subscribe(&TaskId::new("T1")).await.unwrap();

    token.cancel();
    server.await.unwrap();
}

#[tokio::test]
async fn calls_fail_fast_when_never_connected() {
    let (events_tx, _events_rx) = mpsc::channel(8);
    let client = OverseerClient::with_timeouts("ws://127.0.0.1:1", events_tx, test_timeouts());

    assert!(!client.connected());
    match client.stop(&TaskId::new("T1")).await {
        Err(OverseerError::NotConnected) => {}
        other => panic!("expected NotConnected, got {other:?}"),
    }
}
