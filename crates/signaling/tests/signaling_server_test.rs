//! Integration tests for the rendezvous server.
//!
//! Each test binds a real server on a free port and drives it with raw
//! WebSocket clients, asserting on the exact wire messages a client sees.

use std::net::SocketAddr;
use std::time::Duration;

use airlink_signaling::SignalingServer;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .try_init();
}

async fn start_server() -> SignalingServer {
    init_test_tracing();
    SignalingServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("failed to bind server")
}

async fn connect_client(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}"))
        .await
        .expect("failed to connect");
    ws
}

async fn send(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn recv(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn assert_silent(ws: &mut WsClient, window: Duration) {
    match tokio::time::timeout(window, ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(msg))) => panic!("unexpected message: {msg:?}"),
        Ok(other) => panic!("connection ended unexpectedly: {other:?}"),
    }
}

/// Register and drain the ack plus the registration's own membership push.
async fn register(ws: &mut WsClient, peer_id: &str) {
    send(ws, json!({"event": "register", "peer_id": peer_id})).await;

    let ack = recv(ws).await;
    assert_eq!(ack["event"], "registered");
    assert_eq!(ack["peer_id"], peer_id);

    let update = recv(ws).await;
    assert_eq!(update["event"], "peers-update");
}

fn peer_set(update: &Value) -> Vec<String> {
    let mut peers: Vec<String> = update["peers"]
        .as_array()
        .expect("peers must be an array")
        .iter()
        .map(|p| p.as_str().unwrap().to_string())
        .collect();
    peers.sort();
    peers
}

#[tokio::test]
async fn register_ack_precedes_membership_update() {
    let server = start_server().await;
    let mut ws = connect_client(server.local_addr()).await;

    send(&mut ws, json!({"event": "register", "peer_id": "drone1"})).await;

    let first = recv(&mut ws).await;
    assert_eq!(first["event"], "registered");
    assert_eq!(first["peer_id"], "drone1");

    let second = recv(&mut ws).await;
    assert_eq!(second["event"], "peers-update");
    assert_eq!(peer_set(&second), vec!["drone1".to_string()]);

    server.shutdown().await;
}

#[tokio::test]
async fn duplicate_register_rejected_and_original_unaffected() {
    let server = start_server().await;
    let mut first = connect_client(server.local_addr()).await;
    let mut second = connect_client(server.local_addr()).await;

    register(&mut first, "drone1").await;

    send(&mut second, json!({"event": "register", "peer_id": "drone1"})).await;
    let err = recv(&mut second).await;
    assert_eq!(err["event"], "error");
    assert!(
        err["message"].as_str().unwrap().contains("already taken"),
        "unexpected error: {err}"
    );

    // The registry still shows exactly one drone1.
    assert_eq!(server.registry().peer_ids().await, vec!["drone1".to_string()]);

    // The rejected connection stays open and can register a free id.
    register(&mut second, "drone2").await;
    let update = recv(&mut first).await;
    assert_eq!(update["event"], "peers-update");
    assert_eq!(
        peer_set(&update),
        vec!["drone1".to_string(), "drone2".to_string()]
    );

    server.shutdown().await;
}

#[tokio::test]
async fn second_register_on_same_connection_rejected() {
    let server = start_server().await;
    let mut ws = connect_client(server.local_addr()).await;

    register(&mut ws, "drone1").await;
    send(&mut ws, json!({"event": "register", "peer_id": "drone9"})).await;

    let err = recv(&mut ws).await;
    assert_eq!(err["event"], "error");
    assert!(err["message"]
        .as_str()
        .unwrap()
        .contains("Already registered as drone1"));

    server.shutdown().await;
}

#[tokio::test]
async fn offer_relayed_with_server_stamped_from() {
    let server = start_server().await;
    let mut ground = connect_client(server.local_addr()).await;
    let mut drone = connect_client(server.local_addr()).await;

    register(&mut ground, "groundstation").await;
    register(&mut drone, "drone1").await;

    let payload = json!({"type": "offer", "sdp": "v=0 test-offer"});
    // A spoofed `from` must be overwritten by the server.
    send(
        &mut ground,
        json!({
            "event": "signal",
            "from": "mallory",
            "to": "drone1",
            "type": "offer",
            "payload": payload,
        }),
    )
    .await;

    let delivered = recv(&mut drone).await;
    assert_eq!(delivered["event"], "signal");
    assert_eq!(delivered["from"], "groundstation");
    assert_eq!(delivered["type"], "offer");
    assert_eq!(delivered["payload"], payload);

    server.shutdown().await;
}

#[tokio::test]
async fn unknown_target_errors_sender_only() {
    let server = start_server().await;
    let mut ground = connect_client(server.local_addr()).await;
    let mut drone = connect_client(server.local_addr()).await;

    register(&mut ground, "groundstation").await;
    register(&mut drone, "drone1").await;
    // Drain drone1's view of groundstation... it registered first, so
    // drone1 has nothing pending. groundstation drains drone1's join.
    let update = recv(&mut ground).await;
    assert_eq!(update["event"], "peers-update");

    send(
        &mut ground,
        json!({
            "event": "signal",
            "to": "ghost",
            "type": "offer",
            "payload": {"sdp": "v=0"},
        }),
    )
    .await;

    let err = recv(&mut ground).await;
    assert_eq!(err["event"], "error");
    assert_eq!(err["message"], "Peer ghost not found");

    // Nothing reaches the registered peer, and the registry is unchanged.
    assert_silent(&mut drone, Duration::from_millis(200)).await;
    let mut ids = server.registry().peer_ids().await;
    ids.sort();
    assert_eq!(ids, vec!["drone1".to_string(), "groundstation".to_string()]);

    server.shutdown().await;
}

#[tokio::test]
async fn signal_before_register_rejected() {
    let server = start_server().await;
    let mut ws = connect_client(server.local_addr()).await;

    send(
        &mut ws,
        json!({
            "event": "signal",
            "to": "drone1",
            "type": "offer",
            "payload": {"sdp": "v=0"},
        }),
    )
    .await;

    let err = recv(&mut ws).await;
    assert_eq!(err["event"], "error");
    assert_eq!(err["message"], "Peer not registered");

    server.shutdown().await;
}

#[tokio::test]
async fn incomplete_envelope_rejected() {
    let server = start_server().await;
    let mut ws = connect_client(server.local_addr()).await;
    register(&mut ws, "groundstation").await;

    // Missing payload.
    send(
        &mut ws,
        json!({"event": "signal", "to": "drone1", "type": "offer"}),
    )
    .await;
    let err = recv(&mut ws).await;
    assert_eq!(err["event"], "error");
    assert!(err["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid signal payload"));

    // Missing type.
    send(
        &mut ws,
        json!({"event": "signal", "to": "drone1", "payload": {"sdp": "v=0"}}),
    )
    .await;
    let err = recv(&mut ws).await;
    assert_eq!(err["event"], "error");
    assert!(err["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid signal payload"));

    server.shutdown().await;
}

#[tokio::test]
async fn unparseable_frame_reports_error() {
    let server = start_server().await;
    let mut ws = connect_client(server.local_addr()).await;

    ws.send(Message::Text("not json".to_string())).await.unwrap();
    let err = recv(&mut ws).await;
    assert_eq!(err["event"], "error");
    assert!(err["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to parse message"));

    server.shutdown().await;
}

#[tokio::test]
async fn disconnect_broadcasts_exactly_one_membership_update() {
    let server = start_server().await;
    let mut ground = connect_client(server.local_addr()).await;
    let mut drone = connect_client(server.local_addr()).await;

    register(&mut ground, "groundstation").await;
    register(&mut drone, "drone1").await;
    let update = recv(&mut ground).await;
    assert_eq!(
        peer_set(&update),
        vec!["drone1".to_string(), "groundstation".to_string()]
    );

    drone.close(None).await.unwrap();
    drop(drone);

    let update = recv(&mut ground).await;
    assert_eq!(update["event"], "peers-update");
    assert_eq!(peer_set(&update), vec!["groundstation".to_string()]);

    // Exactly one update for one disconnect.
    assert_silent(&mut ground, Duration::from_millis(200)).await;

    server.shutdown().await;
}

#[tokio::test]
async fn list_peers_returns_current_set() {
    let server = start_server().await;
    let mut ground = connect_client(server.local_addr()).await;
    let mut drone = connect_client(server.local_addr()).await;

    register(&mut ground, "groundstation").await;
    register(&mut drone, "drone1").await;

    send(&mut drone, json!({"event": "list-peers"})).await;
    let update = recv(&mut drone).await;
    assert_eq!(update["event"], "peers-update");
    assert_eq!(
        peer_set(&update),
        vec!["drone1".to_string(), "groundstation".to_string()]
    );

    server.shutdown().await;
}
