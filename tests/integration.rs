//! End-to-end tests using a real WebSocket client.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use chat_relay::{serve, AppError, Config, LivenessPolicy};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    url: String,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), AppError>>,
}

/// Boot a relay on an ephemeral port.
async fn boot(config: Config) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(serve(listener, config, shutdown.clone()));
    TestServer {
        url: format!("ws://{addr}"),
        shutdown,
        task,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

async fn send(ws: &mut WsStream, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

/// Next envelope, skipping control frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let frame = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("stream ended")
            .expect("websocket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Next `info` text, skipping chat lines.
async fn next_info(ws: &mut WsStream) -> String {
    loop {
        let msg = next_json(ws).await;
        if msg["type"] == "info" {
            return msg["data"]["text"].as_str().unwrap().to_string();
        }
    }
}

/// Wait until the server closes `ws`.
async fn expect_closed(ws: &mut WsStream) {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("connection not closed") {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => continue,
        }
    }
}

async fn register(url: &str, name: &str) -> WsStream {
    let mut ws = connect(url).await;
    send(&mut ws, name).await;
    assert_eq!(next_json(&mut ws).await, json!({"type": "user", "data": {"name": name}}));
    ws
}

#[tokio::test]
async fn nickname_claim_and_join_notice() {
    let server = boot(Config::default()).await;

    let mut alice = register(&server.url, "alice").await;

    let mut bob = connect(&server.url).await;
    send(&mut bob, "alice").await;
    assert_eq!(
        next_json(&mut bob).await,
        json!({"type": "error", "text": "Failed to connect. Nickname already taken."})
    );

    send(&mut bob, "bob").await;
    assert_eq!(next_json(&mut bob).await, json!({"type": "user", "data": {"name": "bob"}}));

    let notice = next_json(&mut alice).await;
    assert_eq!(notice["type"], "info");
    assert_eq!(notice["data"]["text"], "bob has joined");
    assert!(notice["data"]["time"].is_i64());
}

#[tokio::test]
async fn invalid_nicknames_keep_connection_anonymous() {
    let server = boot(Config::default()).await;
    let mut ws = connect(&server.url).await;

    for bad in ["x", "way-too-long-name"] {
        send(&mut ws, bad).await;
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "error", "text": "Invalid nickname. Min 2, max 10, latin letters or numbers."})
        );
    }

    ws.send(Message::Binary(vec![0xff, 0xfe])).await.unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({"type": "error", "text": "Invalid input. Text must be valid UTF-8."})
    );

    send(&mut ws, "carol").await;
    assert_eq!(next_json(&mut ws).await["type"], "user");
}

#[tokio::test]
async fn messages_are_sanitized_and_echoed_to_registered_only() {
    let server = boot(Config::default()).await;

    let mut alice = register(&server.url, "alice").await;
    let mut bob = register(&server.url, "bob").await;
    assert_eq!(next_info(&mut alice).await, "bob has joined");
    let mut lurker = connect(&server.url).await;

    send(&mut alice, "<script>").await;
    for ws in [&mut alice, &mut bob] {
        let msg = next_json(ws).await;
        assert_eq!(msg["type"], "message");
        assert_eq!(msg["data"]["text"], "&lt;script&gt;");
        assert_eq!(msg["data"]["author"], "alice");
    }

    // The anonymous connection saw nothing; its first payload is still a claim.
    send(&mut lurker, "dave").await;
    assert_eq!(next_json(&mut lurker).await, json!({"type": "user", "data": {"name": "dave"}}));
}

#[tokio::test]
async fn too_long_message_is_rejected_without_broadcast() {
    let server = boot(Config::default()).await;

    let mut alice = register(&server.url, "alice").await;
    let mut bob = register(&server.url, "bob").await;
    assert_eq!(next_info(&mut alice).await, "bob has joined");

    send(&mut bob, &"a".repeat(281)).await;
    assert_eq!(
        next_json(&mut bob).await,
        json!({"type": "error", "text": "Invalid message. Max 280 characters."})
    );

    // The next thing alice sees is bob's follow-up, not the rejected line.
    send(&mut bob, "short").await;
    let msg = next_json(&mut alice).await;
    assert_eq!(msg["type"], "message");
    assert_eq!(msg["data"]["text"], "short");
}

#[tokio::test]
async fn leave_notice_on_remote_close() {
    let server = boot(Config::default()).await;

    let mut alice = register(&server.url, "alice").await;
    let mut bob = register(&server.url, "bob").await;
    assert_eq!(next_info(&mut alice).await, "bob has joined");

    bob.close(None).await.unwrap();
    assert_eq!(next_info(&mut alice).await, "bob left the chat, connection lost");

    // The nickname is free again.
    let _bob_again = register(&server.url, "bob").await;
}

#[tokio::test]
async fn idle_timeout_sends_single_notice() {
    let config = Config {
        idle_timeout_millis: 400,
        ..Config::default()
    };
    let server = boot(config).await;

    let mut alice = register(&server.url, "alice").await;
    let bob = register(&server.url, "bob").await;
    let (mut bob_tx, mut bob_rx) = bob.split();

    // Bob stays active; alice goes quiet.
    let chatter = tokio::spawn(async move {
        for _ in 0..12 {
            if bob_tx.send(Message::Text("still here".to_string())).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    expect_closed(&mut alice).await;

    let mut notices = Vec::new();
    let deadline = Instant::now() + Duration::from_millis(800);
    while let Ok(Some(Ok(frame))) = tokio::time::timeout_at(deadline, bob_rx.next()).await {
        if let Message::Text(text) = frame {
            let msg: Value = serde_json::from_str(&text).unwrap();
            if msg["type"] == "info" {
                notices.push(msg["data"]["text"].as_str().unwrap().to_string());
            }
        }
    }
    chatter.await.unwrap();

    assert_eq!(notices, vec!["alice was disconnected due to inactivity".to_string()]);
}

#[tokio::test]
async fn keepalive_terminates_silent_peer() {
    let config = Config {
        liveness: LivenessPolicy::Keepalive,
        keepalive_interval_millis: 100,
        ..Config::default()
    };
    let server = boot(config).await;

    let mut alice = register(&server.url, "alice").await;
    // Bob never reads again, so his pongs are never sent.
    let _bob = register(&server.url, "bob").await;

    assert_eq!(next_info(&mut alice).await, "bob has joined");
    assert_eq!(next_info(&mut alice).await, "bob left the chat, connection lost");
}

#[tokio::test]
async fn shutdown_closes_connections() {
    let server = boot(Config::default()).await;

    let mut alice = register(&server.url, "alice").await;
    let mut anon = connect(&server.url).await;

    server.shutdown.cancel();

    expect_closed(&mut alice).await;
    expect_closed(&mut anon).await;

    let result = timeout(TIMEOUT, server.task).await.unwrap().unwrap();
    assert!(result.is_ok());
}
