use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use shared::{
    domain::{RideId, RideState, UserId, UserType},
    protocol::{DriverRating, RideNotice, RideUpdate},
};
use tokio::{net::TcpListener, sync::Mutex, time::timeout};

use super::*;

#[derive(Clone, Default)]
struct SocketState {
    handshakes: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<String>>>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SocketState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(state, socket))
}

/// Records the handshake, pushes one noise frame and one ride update, then hangs up.
async fn serve_socket(state: SocketState, mut socket: WebSocket) {
    if let Some(Ok(WsMessage::Text(text))) = socket.recv().await {
        state.handshakes.lock().await.push(text);
    }
    let _ = socket.send(WsMessage::Text("not json".into())).await;
    let frame = serde_json::json!({
        "event": "ride_update",
        "data": {"rideId": "ride-1", "status": "accepted"}
    })
    .to_string();
    let _ = socket.send(WsMessage::Text(frame)).await;
    let _ = socket.send(WsMessage::Close(None)).await;
}

async fn rating_handler(
    ws: WebSocketUpgrade,
    State(state): State<SocketState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_rating(state, socket))
}

/// Acknowledges the first client frame the way the backend does.
async fn serve_rating(state: SocketState, mut socket: WebSocket) {
    if let Some(Ok(WsMessage::Text(text))) = socket.recv().await {
        state.handshakes.lock().await.push(text);
    }
    if let Some(Ok(WsMessage::Text(text))) = socket.recv().await {
        state.received.lock().await.push(text);
        let ack = serde_json::json!({
            "event": "driver_rated",
            "data": {"ride_id": "ride-1", "message": "Driver rated successfully"}
        })
        .to_string();
        let _ = socket.send(WsMessage::Text(ack)).await;
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn spawn_socket_server() -> anyhow::Result<(String, SocketState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = SocketState::default();
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/rating", get(rating_handler))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn config(server_url: String, reconnect: ReconnectPolicy) -> EventSourceConfig {
    EventSourceConfig {
        server_url,
        path: "/ws".into(),
        handshake: AuthHandshake {
            user_id: UserId::new("rider-1"),
            user_type: UserType::Rider,
            token: "t0k3n".into(),
        },
        reconnect,
    }
}

async fn next_signal(rx: &mut mpsc::Receiver<SourceSignal>) -> SourceSignal {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("signal in time")
        .expect("source still running")
}

#[test]
fn default_policy_backs_off_exponentially_then_gives_up() {
    let policy = ReconnectPolicy::default();
    let delays: Vec<u64> = policy.delays().map(|delay| delay.as_secs()).collect();
    assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    assert_eq!(policy.delay_for(0), None);
    assert_eq!(policy.delay_for(6), None);
}

#[test]
fn websocket_url_follows_http_scheme() {
    assert_eq!(
        websocket_url("http://localhost:5000", "/ws")
            .expect("url")
            .as_str(),
        "ws://localhost:5000/ws"
    );
    assert_eq!(
        websocket_url("https://rides.example.com/api/", "/socket")
            .expect("url")
            .as_str(),
        "wss://rides.example.com/socket"
    );
    assert!(websocket_url("ftp://rides.example.com", "/ws").is_err());
    assert!(websocket_url("not a url", "/ws").is_err());
}

#[tokio::test]
async fn delivers_events_and_reports_resumed_reconnects() {
    let (server_url, state) = spawn_socket_server().await.expect("spawn server");
    let source = WebSocketEventSource::new(config(
        server_url,
        ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_attempts: 5,
        },
    ))
    .expect("source");
    let (tx, mut rx) = mpsc::channel(16);
    let (_outbound, outbound_rx) = mpsc::channel(4);
    let task = source.spawn(tx, outbound_rx);

    assert_eq!(
        next_signal(&mut rx).await,
        SourceSignal::Connected { resumed: false }
    );
    assert_eq!(
        next_signal(&mut rx).await,
        SourceSignal::Event(ServerEvent::RideUpdate(RideUpdate {
            ride_id: RideId::new("ride-1"),
            status: RideState::Matched,
            driver: None,
            eta: None,
            message: None,
        }))
    );
    assert!(matches!(
        next_signal(&mut rx).await,
        SourceSignal::Disconnected { .. }
    ));
    assert_eq!(
        next_signal(&mut rx).await,
        SourceSignal::Connected { resumed: true }
    );
    task.abort();

    let handshakes = state.handshakes.lock().await;
    let first: serde_json::Value = serde_json::from_str(&handshakes[0]).expect("json handshake");
    assert_eq!(first["event"], "authenticate");
    assert_eq!(first["data"]["userId"], "rider-1");
    assert_eq!(first["data"]["userType"], "rider");
    assert_eq!(first["data"]["token"], "t0k3n");
}

#[tokio::test]
async fn gives_up_after_exhausting_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let source = WebSocketEventSource::new(config(
        format!("http://{addr}"),
        ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_attempts: 2,
        },
    ))
    .expect("source");
    let (tx, mut rx) = mpsc::channel(4);
    let (_outbound, outbound_rx) = mpsc::channel(4);
    let task = source.spawn(tx, outbound_rx);

    assert_eq!(next_signal(&mut rx).await, SourceSignal::GaveUp { attempts: 2 });
    timeout(Duration::from_secs(5), task)
        .await
        .expect("task finished")
        .expect("task not panicked");
}

#[tokio::test]
async fn writes_client_messages_and_decodes_backend_acks() {
    let (server_url, state) = spawn_socket_server().await.expect("spawn server");
    let mut config = config(server_url, ReconnectPolicy::default());
    config.path = "/rating".into();
    let source = WebSocketEventSource::new(config).expect("source");
    let (tx, mut rx) = mpsc::channel(16);
    let (outbound, outbound_rx) = mpsc::channel(4);
    outbound
        .send(ClientMessage::RateDriver(DriverRating {
            ride_id: RideId::new("ride-1"),
            rating: 4,
            comment: Some("smooth".into()),
        }))
        .await
        .expect("queue rating");
    let task = source.spawn(tx, outbound_rx);

    assert_eq!(
        next_signal(&mut rx).await,
        SourceSignal::Connected { resumed: false }
    );
    assert_eq!(
        next_signal(&mut rx).await,
        SourceSignal::Event(ServerEvent::DriverRated(RideNotice {
            ride_id: RideId::new("ride-1"),
            driver_id: None,
            driver: None,
            eta: None,
            message: Some("Driver rated successfully".into()),
        }))
    );
    task.abort();

    let received = state.received.lock().await;
    let frame: serde_json::Value = serde_json::from_str(&received[0]).expect("json frame");
    assert_eq!(frame["event"], "rate_driver");
    assert_eq!(frame["data"]["ride_id"], "ride-1");
    assert_eq!(frame["data"]["rating"], 4);
    assert_eq!(frame["data"]["comment"], "smooth");
}
