//! End-to-end scenarios over a real axum server and websocket client.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{routing::get, Router};
use channelcast::{
    handler::ws_handler, AtomicCollector, Channelcast, Collector, Config, Error, Token,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64
}

async fn serve(engine: Arc<Channelcast>) -> String {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(engine);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("ws://{addr}/ws")
}

async fn connect(url: &str) -> WsClient {
    let (client, _) = tokio_tungstenite::connect_async(url).await.expect("connect");
    client
}

async fn send_json(client: &mut WsClient, value: serde_json::Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("send");
}

/// Reads the next text frame, skipping transport pings and pongs.
async fn recv_json(client: &mut WsClient) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("frame");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Asserts that no text frame arrives within the given window.
async fn assert_silent(client: &mut WsClient, window: Duration) {
    let outcome = tokio::time::timeout(window, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => break other,
            }
        }
    })
    .await;
    assert!(outcome.is_err(), "expected silence, got {outcome:?}");
}

async fn wait_for(mut cond: impl FnMut() -> bool, what: &str) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn engine_with(config: Config) -> (Arc<Channelcast>, Arc<AtomicCollector>) {
    let collector = Arc::new(AtomicCollector::new());
    let config = config.with_collector(Arc::clone(&collector) as Arc<dyn Collector>);
    (
        Arc::new(Channelcast::new(config).expect("engine")),
        collector,
    )
}

#[tokio::test]
async fn test_public_subscribe_and_receive() {
    let (engine, collector) = engine_with(Config::default());
    let news = engine.register_public_channel("news");
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;
    send_json(
        &mut client,
        json!({"type": "subscribe", "params": {"channels": ["news"]}}),
    )
    .await;
    wait_for(|| collector.storage_subscribed_channels() == 1, "subscription").await;

    engine.send_public(&news, &json!({"a": 1})).await.expect("publish");

    let frame = recv_json(&mut client).await;
    assert_eq!(frame, json!({"channel": "news", "data": {"a": 1}}));

    // exactly one frame for one publish
    assert_silent(&mut client, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_public_fan_out_to_all_subscribers() {
    let (engine, collector) = engine_with(Config::default());
    let news = engine.register_public_channel("news");
    let url = serve(Arc::clone(&engine)).await;

    let mut first = connect(&url).await;
    let mut second = connect(&url).await;
    for client in [&mut first, &mut second] {
        send_json(
            client,
            json!({"type": "subscribe", "params": {"channels": ["news"]}}),
        )
        .await;
    }
    wait_for(|| collector.storage_open_connections() == 2, "subscriptions").await;

    engine
        .send_public(&news, &json!({"seq": 1}))
        .await
        .expect("publish");

    for client in [&mut first, &mut second] {
        let frame = recv_json(client).await;
        assert_eq!(frame["data"]["seq"], 1);
    }
}

#[tokio::test]
async fn test_per_connection_order_is_preserved() {
    let (engine, collector) = engine_with(Config::default());
    let news = engine.register_public_channel("news");
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;
    send_json(
        &mut client,
        json!({"type": "subscribe", "params": {"channels": ["news"]}}),
    )
    .await;
    wait_for(|| collector.storage_subscribed_channels() == 1, "subscription").await;

    for seq in 0..20 {
        engine
            .send_public(&news, &json!({"seq": seq}))
            .await
            .expect("publish");
    }

    for seq in 0..20 {
        let frame = recv_json(&mut client).await;
        assert_eq!(frame["data"]["seq"], seq);
    }
}

#[tokio::test]
async fn test_subscribe_unknown_channel_reports_error() {
    let (engine, collector) = engine_with(Config::default());
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;
    send_json(
        &mut client,
        json!({"type": "subscribe", "params": {"channels": ["unknown"]}}),
    )
    .await;

    let frame = recv_json(&mut client).await;
    assert_eq!(frame["channel"], "error");
    let field_errors = frame["data"]["field_errors"].as_array().expect("field errors");
    assert_eq!(field_errors[0]["field"], "channels[unknown]");

    // no subscription was created, and publishing there is a no-op
    assert_eq!(collector.storage_subscribed_channels(), 0);
    engine
        .send_public(&channelcast::Channel::from("unknown"), &json!({"a": 1}))
        .await
        .expect("publish");
    assert_silent(&mut client, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_private_subscribe_without_token_rejected() {
    let (engine, collector) = engine_with(
        Config::default().with_auth_fn(|raw| Ok(Token::new(raw, "U", i64::MAX))),
    );
    engine.register_private_channel("notif");
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;
    send_json(
        &mut client,
        json!({"type": "subscribe", "params": {"channels": ["notif"]}}),
    )
    .await;

    let frame = recv_json(&mut client).await;
    assert_eq!(frame["channel"], "error");
    assert!(frame["data"]["field_errors"].is_array());
    assert_eq!(collector.private_connections(), 0);
    assert_eq!(collector.storage_subscribed_channels(), 0);
}

#[tokio::test]
async fn test_private_happy_path() {
    let expires_at = now_secs() + 60;
    let (engine, collector) = engine_with(
        Config::default().with_auth_fn(move |raw| Ok(Token::new(raw, "U", expires_at))),
    );
    let notif = engine.register_private_channel("notif");
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;
    send_json(
        &mut client,
        json!({"type": "subscribe", "params": {"channels": ["notif"], "token": "T"}}),
    )
    .await;
    wait_for(|| collector.private_connections() == 1, "private subscription").await;

    engine
        .send_private(&notif, "U", &json!({"x": 1}))
        .await
        .expect("publish");

    let frame = recv_json(&mut client).await;
    assert_eq!(frame, json!({"channel": "notif", "data": {"x": 1}}));
}

#[tokio::test]
async fn test_private_send_targets_only_the_user() {
    let (engine, collector) = engine_with(Config::default().with_auth_fn(|raw| {
        // token string doubles as the user for this host
        Ok(Token::new(raw, raw, i64::MAX))
    }));
    let notif = engine.register_private_channel("notif");
    let url = serve(Arc::clone(&engine)).await;

    let mut alice = connect(&url).await;
    let mut bob = connect(&url).await;
    send_json(
        &mut alice,
        json!({"type": "subscribe", "params": {"channels": ["notif"], "token": "alice"}}),
    )
    .await;
    send_json(
        &mut bob,
        json!({"type": "subscribe", "params": {"channels": ["notif"], "token": "bob"}}),
    )
    .await;
    wait_for(|| collector.private_connections() == 2, "private subscriptions").await;

    engine
        .send_private(&notif, "alice", &json!({"for": "alice"}))
        .await
        .expect("publish");

    let frame = recv_json(&mut alice).await;
    assert_eq!(frame["data"]["for"], "alice");
    assert_silent(&mut bob, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_token_expiry_during_private_send() {
    let expires_at = now_secs() + 2;
    let (engine, collector) = engine_with(
        Config::default().with_auth_fn(move |raw| Ok(Token::new(raw, "U", expires_at))),
    );
    let notif = engine.register_private_channel("notif");
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;
    send_json(
        &mut client,
        json!({"type": "subscribe", "params": {"channels": ["notif"], "token": "T"}}),
    )
    .await;
    wait_for(|| collector.private_connections() == 1, "private subscription").await;

    tokio::time::sleep(Duration::from_secs(3)).await;

    let err = engine
        .send_private(&notif, "U", &json!({"x": 1}))
        .await
        .expect_err("expired send");
    assert!(matches!(err, Error::AuthTokenExpired));
    assert_eq!(collector.private_connections(), 0);

    // the client learns why messages stopped, and gets no data frame
    let frame = recv_json(&mut client).await;
    assert_eq!(frame["channel"], "error");
    assert_eq!(frame["data"]["channel"], "notif");
    assert_silent(&mut client, Duration::from_millis(200)).await;

    // with the user mapping gone, later sends are clean no-ops
    engine
        .send_private(&notif, "U", &json!({"x": 2}))
        .await
        .expect("noop");
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (engine, collector) = engine_with(Config::default());
    let news = engine.register_public_channel("news");
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;
    send_json(
        &mut client,
        json!({"type": "subscribe", "params": {"channels": ["news"]}}),
    )
    .await;
    wait_for(|| collector.storage_subscribed_channels() == 1, "subscription").await;

    engine.send_public(&news, &json!({"seq": 1})).await.expect("publish");
    assert_eq!(recv_json(&mut client).await["data"]["seq"], 1);

    send_json(
        &mut client,
        json!({"type": "unsubscribe", "params": {"channels": ["news"]}}),
    )
    .await;
    wait_for(|| collector.storage_subscribed_channels() == 0, "unsubscribe").await;

    engine.send_public(&news, &json!({"seq": 2})).await.expect("publish");
    assert_silent(&mut client, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_server_emits_pings() {
    let (engine, _collector) = engine_with(
        Config::default()
            .with_ping_period(Duration::from_millis(200))
            .with_pong_wait(Duration::from_secs(60)),
    );
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;

    let message = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for ping")
        .expect("stream ended")
        .expect("frame");
    match message {
        Message::Ping(payload) => {
            let text = String::from_utf8(payload.to_vec()).expect("ascii payload");
            let seconds: i64 = text.parse().expect("epoch seconds");
            assert!((seconds - now_secs()).abs() <= 2);
        }
        other => panic!("expected ping, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_disconnect_cleans_up() {
    let (engine, collector) = engine_with(Config::default());
    engine.register_public_channel("news");
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;
    send_json(
        &mut client,
        json!({"type": "subscribe", "params": {"channels": ["news"]}}),
    )
    .await;
    wait_for(|| collector.open_connections() == 1, "connection").await;
    wait_for(|| collector.storage_open_connections() == 1, "subscription").await;

    client.close(None).await.expect("close");

    wait_for(|| collector.open_connections() == 0, "teardown").await;
    assert_eq!(collector.storage_open_connections(), 0);
    assert_eq!(collector.storage_subscribed_channels(), 0);
}

#[tokio::test]
async fn test_shutdown_tears_down_connections() {
    let (engine, collector) = engine_with(Config::default());
    engine.register_public_channel("news");
    let url = serve(Arc::clone(&engine)).await;

    let mut client = connect(&url).await;
    send_json(
        &mut client,
        json!({"type": "subscribe", "params": {"channels": ["news"]}}),
    )
    .await;
    wait_for(|| collector.open_connections() == 1, "connection").await;

    engine.shutdown();
    wait_for(|| collector.open_connections() == 0, "teardown").await;

    // the peer observes the close
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "client never saw the close");
}
