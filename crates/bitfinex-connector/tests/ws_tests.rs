/*
[INPUT]:  Loopback WebSocket server scenarios
[OUTPUT]: Test results for the stream transport, router and reconnect replay
[POS]:    Integration tests - WebSocket
[UPDATE]: When WebSocket client changes
*/

mod common;

use std::sync::Arc;
use std::time::Duration;

use bitfinex_connector::{
    AcceptGate, BitfinexConnector, BitfinexError, BitfinexWebSocket, ConnectionState,
    ConnectorConfig, MarketEvent, StreamConfig, StreamRouter, SubscriptionRegistry,
};
use common::{init_tracing, setup_mock_server, trade_ids};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("server send");
}

/// Two sessions: the first delivers a snapshot and an update then drops the
/// connection, the second expects the replayed subscribe.
async fn spawn_exchange(listener: TcpListener, requests: mpsc::UnboundedSender<String>) {
    tokio::spawn(async move {
        for session in 1..=2i64 {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            send_json(&mut ws, json!({"event": "info", "version": 2})).await;

            let Some(request) = next_text(&mut ws).await else {
                return;
            };
            let _ = requests.send(request);

            let chan_id = 100 + session;
            send_json(
                &mut ws,
                json!({"event": "subscribed", "channel": "trades", "chanId": chan_id, "symbol": "tBTCUSD"}),
            )
            .await;

            if session == 1 {
                send_json(
                    &mut ws,
                    json!([chan_id, [[2, 1_700_000_002_000i64, -0.5, 100], [1, 1_700_000_001_000i64, 0.5, 100]]]),
                )
                .await;
                send_json(&mut ws, json!([chan_id, "hb"])).await;
                send_json(&mut ws, json!([chan_id, "tu", [3, 1_700_000_003_000i64, 0.1, 100]])).await;
                let _ = ws.close(None).await;
            } else {
                send_json(&mut ws, json!([chan_id, "tu", [3, 1_700_000_003_000i64, 0.1, 100]])).await;
                send_json(&mut ws, json!([chan_id, "tu", [4, 1_700_000_004_000i64, -0.1, 100]])).await;
                while next_text(&mut ws).await.is_some() {}
            }
        }
    });
}

async fn next_event(events: &mut broadcast::Receiver<MarketEvent>) -> MarketEvent {
    assert_ok!(assert_ok!(tokio::time::timeout(WAIT, events.recv()).await))
}

#[tokio::test]
async fn test_stream_snapshot_update_and_reconnect_replay() {
    init_tracing();
    let rest = setup_mock_server().await;
    Mock::given(method("GET"))
        .and(path("/trades/tBTCUSD/hist"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&rest)
        .await;

    let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
    let addr = assert_ok!(listener.local_addr());
    let (requests_tx, mut requests_rx) = mpsc::unbounded_channel();
    spawn_exchange(listener, requests_tx).await;

    let config = ConnectorConfig {
        rest_base_url: rest.uri(),
        stream: StreamConfig {
            url: format!("ws://{addr}"),
            max_backoff: Duration::from_millis(50),
            ..StreamConfig::default()
        },
        ..ConnectorConfig::default()
    };
    let mut connector = assert_ok!(BitfinexConnector::connect(config).await);
    let mut events = connector.events();

    assert_ok!(connector.subscribe_trades("tBTCUSD").await);
    let first = assert_ok!(tokio::time::timeout(WAIT, requests_rx.recv()).await).expect("first request");
    let first: Value = assert_ok!(serde_json::from_str(&first));
    assert_eq!(
        first,
        json!({"event": "subscribe", "channel": "trades", "symbol": "tBTCUSD"})
    );

    let mut received = Vec::new();
    for _ in 0..3 {
        received.push(next_event(&mut events).await);
    }
    assert_eq!(trade_ids(&received), [1, 2, 3]);

    let replayed = assert_ok!(tokio::time::timeout(WAIT, requests_rx.recv()).await).expect("replay");
    let replayed: Value = assert_ok!(serde_json::from_str(&replayed));
    assert_eq!(replayed, first);

    // the duplicate of trade 3 on the new session is dropped
    let fourth = next_event(&mut events).await;
    assert_eq!(trade_ids(&[fourth]), [4]);

    connector.disconnect().await;
    assert!(connector.connection_state().is_none());
}

#[tokio::test]
async fn test_stream_gives_up_after_max_retries() {
    init_tracing();
    // bind then drop so the port refuses connections
    let addr = {
        let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
        assert_ok!(listener.local_addr())
    };
    let ws = BitfinexWebSocket::new(StreamConfig {
        url: format!("ws://{addr}"),
        max_retries: 2,
        max_backoff: Duration::from_millis(10),
        ..StreamConfig::default()
    });
    let router = StreamRouter::new(
        Arc::new(SubscriptionRegistry::new()),
        Arc::new(AcceptGate::new(8)),
    );
    assert_ok!(ws.start(Arc::new(router)));

    let connected = assert_ok!(tokio::time::timeout(WAIT, ws.wait_connected()).await);
    // the refused connect is reported, not a bare NotConnected
    assert!(matches!(connected, Err(BitfinexError::WebSocket(_))));
    assert_eq!(ws.connection_state(), ConnectionState::Closed);

    // the failure is handed out once
    assert!(matches!(ws.wait_connected().await, Err(BitfinexError::NotConnected)));
}

#[test]
fn test_websocket_starts_disconnected() {
    let ws = BitfinexWebSocket::new(StreamConfig::default());
    assert_eq!(
        ws.connection_state(),
        ConnectionState::Disconnected { retry_count: 0 }
    );
}
