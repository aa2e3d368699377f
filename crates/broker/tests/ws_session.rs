// SPDX-License-Identifier: BUSL-1.1

//! WebSocket integration tests driving the broker through real TCP
//! connections with both a glasses and App peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use glasses_broker::collaborators::{Collaborators, InMemoryMediaBackend, InMemoryStore};
use glasses_broker::state::BrokerState;
use glasses_broker::test_support::{spawn_server, test_config};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn ws_send(tx: &mut WsTx, value: serde_json::Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(&value)?;
    tx.send(WsMessage::Text(text.into())).await?;
    Ok(())
}

async fn ws_recv_json(rx: &mut WsRx) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, rx.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for a message"))?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
        match msg {
            WsMessage::Text(text) => return Ok(serde_json::from_str(&text)?),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => anyhow::bail!("expected a text frame, got {other:?}"),
        }
    }
}

async fn connect(addr: SocketAddr, path: &str) -> anyhow::Result<(WsTx, WsRx)> {
    let url = format!("ws://{addr}{path}");
    let (stream, _) = tokio_tungstenite::connect_async(&url).await?;
    Ok(stream.split())
}

async fn connect_glasses(addr: SocketAddr, user_id: &str) -> anyhow::Result<(WsTx, WsRx)> {
    connect(addr, &format!("/ws/glasses?user_id={user_id}")).await
}

/// Connect an App to the session for `user_id`. An App only ever learns a
/// session's `sessionId` (handed to it by the start webhook in production);
/// here we read it straight off the registry the way the webhook body would
/// carry it, then send it back exactly as a real App does.
async fn connect_app(
    addr: SocketAddr,
    state: &BrokerState,
    package_name: &str,
    api_key: &str,
    user_id: &str,
) -> anyhow::Result<(WsTx, WsRx)> {
    let session_id = state.attach(user_id).await.session_id;
    let (mut tx, mut rx) = connect(addr, "/ws/app").await?;
    ws_send(
        &mut tx,
        serde_json::json!({
            "type": "tpa_connection_init",
            "packageName": package_name,
            "apiKey": api_key,
            "sessionId": session_id,
        }),
    )
    .await?;
    let ack = ws_recv_json(&mut rx).await?;
    assert_eq!(ack["type"], "connection_ack");
    assert_eq!(ack["sessionId"], session_id);
    Ok((tx, rx))
}

/// Broker state with a real `InMemoryStore` the test can seed before apps
/// attempt to connect.
fn seeded_state() -> (Arc<BrokerState>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let collaborators = Collaborators {
        store: store.clone(),
        media_backend: Arc::new(InMemoryMediaBackend::new()),
    };
    let state =
        Arc::new(BrokerState::new(Arc::new(test_config()), collaborators, CancellationToken::new()));
    (state, store)
}

#[tokio::test]
async fn button_press_fans_out_to_subscribed_app() -> anyhow::Result<()> {
    let (state, store) = seeded_state();
    store.seed_app("com.example.remote", "key-1", "http://app.example.test/webhook").await;
    let (addr, _server) = spawn_server(Arc::clone(&state)).await?;

    let (mut glasses_tx, _glasses_rx) = connect_glasses(addr, "user-a").await?;
    let (mut app_tx, mut app_rx) = connect_app(addr, &state, "com.example.remote", "key-1", "user-a").await?;

    ws_send(&mut app_tx, serde_json::json!({ "type": "subscription_update", "subscriptions": ["button_press"] }))
        .await?;
    // Let the subscription land before the event it should observe.
    tokio::time::sleep(Duration::from_millis(50)).await;

    ws_send(
        &mut glasses_tx,
        serde_json::json!({ "type": "button_press", "buttonId": "main", "pressType": "short" }),
    )
    .await?;

    let event = ws_recv_json(&mut app_rx).await?;
    assert_eq!(event["type"], "data_stream");
    assert_eq!(event["streamType"], "button_press");
    assert_eq!(event["data"]["buttonId"], "main");
    Ok(())
}

#[tokio::test]
async fn app_handshake_rejects_bad_api_key() -> anyhow::Result<()> {
    let (state, store) = seeded_state();
    store.seed_app("com.example.remote", "correct-key", "http://app.example.test/webhook").await;
    let (addr, _server) = spawn_server(state).await?;

    let (mut tx, mut rx) = connect(addr, "/ws/app").await?;
    ws_send(
        &mut tx,
        serde_json::json!({
            "type": "tpa_connection_init",
            "packageName": "com.example.remote",
            "apiKey": "wrong-key",
            "sessionId": "whatever-session",
        }),
    )
    .await?;

    let msg = tokio::time::timeout(RECV_TIMEOUT, rx.next()).await?;
    match msg {
        Some(Ok(WsMessage::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1008),
        Some(Ok(WsMessage::Close(None))) | None => {}
        other => panic!("expected the handshake to be rejected, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn second_direct_stream_request_is_rejected_busy() -> anyhow::Result<()> {
    let (state, store) = seeded_state();
    store.seed_app("com.example.first", "key-1", "http://a.example.test/webhook").await;
    store.seed_app("com.example.second", "key-2", "http://b.example.test/webhook").await;
    let (addr, _server) = spawn_server(Arc::clone(&state)).await?;

    let (_glasses_tx, mut glasses_rx) = connect_glasses(addr, "user-a").await?;
    let (mut first_tx, _first_rx) = connect_app(addr, &state, "com.example.first", "key-1", "user-a").await?;
    let (mut second_tx, mut second_rx) = connect_app(addr, &state, "com.example.second", "key-2", "user-a").await?;

    ws_send(&mut second_tx, serde_json::json!({ "type": "subscription_update", "subscriptions": ["rtmp_status"] }))
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    ws_send(&mut first_tx, serde_json::json!({ "type": "rtmp_stream_request", "rtmpUrl": "rtmp://dest/a" }))
        .await?;
    let start = ws_recv_json(&mut glasses_rx).await?;
    assert_eq!(start["type"], "start_rtmp_stream");

    ws_send(&mut second_tx, serde_json::json!({ "type": "rtmp_stream_request", "rtmpUrl": "rtmp://dest/b" }))
        .await?;

    let busy = ws_recv_json(&mut second_rx).await?;
    assert_eq!(busy["type"], "rtmp_stream_status");
    assert_eq!(busy["status"], "busy");
    Ok(())
}

#[tokio::test]
async fn photo_request_round_trips_to_requesting_app() -> anyhow::Result<()> {
    let (state, store) = seeded_state();
    store.seed_app("com.example.cam", "key-1", "http://cam.example.test/webhook").await;
    let (addr, _server) = spawn_server(Arc::clone(&state)).await?;

    let (mut glasses_tx, mut glasses_rx) = connect_glasses(addr, "user-a").await?;
    let (mut app_tx, mut app_rx) = connect_app(addr, &state, "com.example.cam", "key-1", "user-a").await?;

    ws_send(&mut app_tx, serde_json::json!({ "type": "photo_request", "saveToGallery": false })).await?;

    let request = ws_recv_json(&mut glasses_rx).await?;
    assert_eq!(request["type"], "request_photo");
    let request_id = request["requestId"].as_str().unwrap().to_owned();

    ws_send(
        &mut glasses_tx,
        serde_json::json!({
            "type": "photo_response",
            "requestId": request_id,
            "imageUrl": "https://cdn.example.test/photo.jpg",
        }),
    )
    .await?;

    let event = ws_recv_json(&mut app_rx).await?;
    assert_eq!(event["type"], "data_stream");
    assert_eq!(event["streamType"], "photo_taken");
    assert_eq!(event["data"]["imageUrl"], "https://cdn.example.test/photo.jpg");
    Ok(())
}
