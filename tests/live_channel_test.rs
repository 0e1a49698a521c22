//! Live channel against a loopback WebSocket server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::WebSocketStream;
use tungstenite::Message;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};

use ordersync::auth::StaticCredentials;
use ordersync::live::{LiveChannel, LiveStatus};
use ordersync::sync::{ConnectionMode, SyncEvent, UpdateSource};
use ordersync::tls::build_tls_config;

use common::branch;

const WAIT: Duration = Duration::from_secs(10);

type Headers = (Option<String>, Option<String>);

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind loopback listener");
    let url = format!(
        "ws://{}",
        listener.local_addr().expect("Failed to read local address")
    );
    (listener, url)
}

/// Accepts one client, reporting its auth headers.
async fn accept(
    listener: &TcpListener,
    headers: oneshot::Sender<Headers>,
) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("Failed to accept");
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let _ = headers.send((header("authorization"), header("x-api-key")));
        Ok(resp)
    };
    tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .expect("Handshake failed")
}

/// Reads frames until the subscribe request arrives.
async fn read_subscribe(ws: &mut WebSocketStream<TcpStream>) -> serde_json::Value {
    while let Some(msg) = ws.next().await {
        if let Ok(Message::Text(text)) = msg {
            return serde_json::from_str(text.as_str()).expect("Subscribe is not JSON");
        }
    }
    panic!("client closed before subscribing");
}

async fn send(ws: &mut WebSocketStream<TcpStream>, text: &str) {
    ws.send(Message::Text(text.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Keeps the connection open until the client goes away.
async fn drain(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(_)) = ws.next().await {}
}

fn channel(url: &str) -> (LiveChannel, mpsc::UnboundedReceiver<SyncEvent>) {
    let (events, rx) = mpsc::unbounded_channel();
    let tls = Arc::new(build_tls_config(None).expect("Failed to build TLS config"));
    let auth = Arc::new(StaticCredentials::new(
        Some("tok-123".into()),
        Some("key-9".into()),
    ));
    (LiveChannel::new(url, branch(), tls, auth, events), rx)
}

async fn next_updates(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<String> {
    let event = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("Timeout waiting for updates")
        .expect("Event channel closed");
    match event {
        SyncEvent::Updates { source, updates } => {
            assert_eq!(source, UpdateSource::LiveChannel);
            updates
                .iter()
                .map(|u| u.order_id().as_str().to_string())
                .collect()
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_subscribes_and_forwards_pushed_updates() {
    let (listener, url) = bind().await;
    let (headers_tx, headers_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener, headers_tx).await;
        let subscribe = read_subscribe(&mut ws).await;
        send(&mut ws, r#"{"method":"subscribe","success":true}"#).await;
        send(
            &mut ws,
            r#"{"type":"order:created","data":{"_id":"A","overallStatus":"pending"}}"#,
        )
        .await;
        drain(ws).await;
        subscribe
    });

    let (live, mut rx) = channel(&url);
    let mut status = live.status();
    let handle = live.start();

    tokio::time::timeout(WAIT, status.wait_for(|s| *s == LiveStatus::Connected))
        .await
        .expect("Timeout waiting for connection")
        .expect("Status sender dropped");
    assert_eq!(next_updates(&mut rx).await, vec!["A"]);

    handle.stop().await;
    assert_eq!(*status.borrow(), LiveStatus::Disconnected);

    let subscribe = server.await.expect("Server task panicked");
    assert_eq!(subscribe["method"], "subscribe");
    assert_eq!(subscribe["params"]["branchId"], "plant-1");

    let (authorization, api_key) = headers_rx.await.expect("Headers not captured");
    assert_eq!(authorization.as_deref(), Some("Bearer tok-123"));
    assert_eq!(api_key.as_deref(), Some("key-9"));
}

#[tokio::test]
async fn test_updates_are_held_back_while_polling_is_authoritative() {
    let (listener, url) = bind().await;
    let (headers_tx, _headers_rx) = oneshot::channel();
    let (go_tx, go_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener, headers_tx).await;
        read_subscribe(&mut ws).await;
        send(&mut ws, r#"{"type":"updated","data":{"_id":"A"}}"#).await;
        let _ = go_rx.await;
        send(&mut ws, r#"[{"type":"updated","data":{"_id":"B"}}]"#).await;
        drain(ws).await;
    });

    let (mode_tx, mode_rx) = watch::channel(ConnectionMode::Polling);
    let (live, mut rx) = channel(&url);
    let live = live.gated_by(mode_rx);
    let mut status = live.status();
    let handle = live.start();

    tokio::time::timeout(WAIT, status.wait_for(|s| *s == LiveStatus::Connected))
        .await
        .expect("Timeout waiting for connection")
        .expect("Status sender dropped");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err(), "update leaked while polling");

    mode_tx.send_replace(ConnectionMode::Websocket);
    let _ = go_tx.send(());
    assert_eq!(next_updates(&mut rx).await, vec!["B"]);

    handle.stop().await;
    server.await.expect("Server task panicked");
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (first_tx, _first_rx) = oneshot::channel();
        let mut ws = accept(&listener, first_tx).await;
        read_subscribe(&mut ws).await;
        drop(ws);

        let (second_tx, _second_rx) = oneshot::channel();
        let mut ws = accept(&listener, second_tx).await;
        read_subscribe(&mut ws).await;
        send(&mut ws, r#"{"type":"status_changed","data":{"_id":"C"}}"#).await;
        drain(ws).await;
    });

    let (live, mut rx) = channel(&url);
    let handle = live.start();

    assert_eq!(next_updates(&mut rx).await, vec!["C"]);

    handle.stop().await;
    server.await.expect("Server task panicked");
}
