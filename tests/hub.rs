//! End-to-end tests against a running hub on loopback ports

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use zmqhub::bus::{EventBody, Subscription};
use zmqhub::client::PublishRequest;
use zmqhub::socket::{ConnectedSocket, Context, SocketOptions, SocketType};
use zmqhub::web::{self, control};
use zmqhub::{AppContext, EventBus, Settings};

const WAIT: Duration = Duration::from_secs(3);

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Settings with fixed loopback ports; injection dials the real ingress
fn hub_settings() -> Settings {
    let ingress = format!("tcp://127.0.0.1:{}", free_port());
    Settings::default()
        .ingress_bind(ingress.clone())
        .egress_bind(format!("tcp://127.0.0.1:{}", free_port()))
        .inject_connect(ingress)
}

async fn start_hub(settings: Settings) -> (AppContext, Subscription) {
    let (bus, _task) = EventBus::new(4096).spawn(4096);
    let sub = bus.subscribe().await.unwrap();
    let ctx = AppContext::new(Arc::new(settings), bus);
    ctx.hub.start().await.unwrap();
    (ctx, sub)
}

async fn consumer(ctx: &Context, settings: &Settings) -> ConnectedSocket {
    let mut socket = ctx
        .connect(SocketType::Sub, &settings.egress_bind, &SocketOptions::default())
        .await
        .unwrap();
    socket.subscribe(Bytes::new()).await.unwrap();
    socket
}

/// Inject until the consumer's subscription has reached the ingress side
async fn inject_until_received(
    app: &AppContext,
    consumer: &mut ConnectedSocket,
    request: PublishRequest,
) -> Vec<Bytes> {
    let deadline = Instant::now() + WAIT;
    loop {
        assert!(Instant::now() < deadline, "nothing forwarded");
        app.hub.publish(request.clone()).await.unwrap();
        if let Ok(Ok(frames)) =
            tokio::time::timeout(Duration::from_millis(100), consumer.recv()).await
        {
            return frames;
        }
    }
}

/// Next event whose JSON satisfies `pred`
async fn next_json(sub: &Subscription, pred: impl Fn(&Value) -> bool) -> Value {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = tokio::time::timeout(remaining, sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed");
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        if pred(&value) {
            return value;
        }
    }
}

fn is_traffic(source: &'static str) -> impl Fn(&Value) -> bool {
    move |v| v["kind"] == "bus" && v["source"] == source
}

/// First ingress and first inject traffic events, arriving in either order
async fn ingress_and_inject(sub: &Subscription) -> (Value, Value) {
    let (mut ingress, mut inject) = (None, None);
    while ingress.is_none() || inject.is_none() {
        let event = next_json(sub, |v| v["kind"] == "bus").await;
        let slot = match event["source"].as_str() {
            Some("ingress") => &mut ingress,
            Some("inject") => &mut inject,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(event);
        }
    }
    (ingress.unwrap(), inject.unwrap())
}

#[tokio::test]
async fn test_text_message_round_trip() {
    let settings = hub_settings();
    let (app, sub) = start_hub(settings.clone()).await;
    let ctx = Context::new();
    let mut sub_socket = consumer(&ctx, &settings).await;

    let frames = inject_until_received(
        &app,
        &mut sub_socket,
        PublishRequest::text("demo", Some("hello")),
    )
    .await;
    assert_eq!(
        frames,
        vec![Bytes::from_static(b"demo"), Bytes::from_static(b"hello")]
    );

    let (forwarded, injected) = ingress_and_inject(&sub).await;
    assert_eq!(forwarded["topic"], "demo");
    assert_eq!(forwarded["payload"], "hello");
    assert!(forwarded["meta"].get("ui_originated").is_none());
    assert_eq!(injected["topic"], "demo");
    assert_eq!(injected["payload"], "hello");
    assert_eq!(injected["meta"]["ui_originated"], true);

    ctx.terminate(Duration::from_secs(1)).await;
    app.hub.stop().await;
}

#[tokio::test]
async fn test_multipart_binary_payload() {
    let settings = hub_settings();
    let (app, sub) = start_hub(settings.clone()).await;
    let ctx = Context::new();
    let mut sub_socket = consumer(&ctx, &settings).await;

    let request = PublishRequest::multipart("bin", vec!["AAE=".into(), "dGV4dA==".into()]);
    let frames = inject_until_received(&app, &mut sub_socket, request).await;
    assert_eq!(
        frames,
        vec![
            Bytes::from_static(b"bin"),
            Bytes::from_static(b"\x00\x01"),
            Bytes::from_static(b"text"),
        ]
    );

    // control bytes are still valid UTF-8
    let forwarded = next_json(&sub, is_traffic("ingress")).await;
    assert_eq!(forwarded["payload"], serde_json::json!(["\u{0000}\u{0001}", "text"]));
    assert_eq!(
        forwarded["meta"]["payload_encodings"],
        serde_json::json!(["utf8", "utf8"])
    );
    assert_eq!(forwarded["meta"]["parts"], 3);

    ctx.terminate(Duration::from_secs(1)).await;
    app.hub.stop().await;
}

#[tokio::test]
async fn test_invalid_utf8_payload_is_base64() {
    let settings = hub_settings();
    let (app, sub) = start_hub(settings.clone()).await;
    let ctx = Context::new();
    let mut sub_socket = consumer(&ctx, &settings).await;

    let request = PublishRequest::multipart("bin", vec!["/wA=".into(), "dGV4dA==".into()]);
    let frames = inject_until_received(&app, &mut sub_socket, request).await;
    assert_eq!(
        frames,
        vec![
            Bytes::from_static(b"bin"),
            Bytes::from_static(b"\xff\x00"),
            Bytes::from_static(b"text"),
        ]
    );

    let forwarded = next_json(&sub, is_traffic("ingress")).await;
    assert_eq!(forwarded["payload"], serde_json::json!(["/wA=", "text"]));
    assert_eq!(
        forwarded["meta"]["payload_encodings"],
        serde_json::json!(["base64", "utf8"])
    );
    assert_eq!(forwarded["meta"]["sizes"], serde_json::json!([3, 2, 4]));

    ctx.terminate(Duration::from_secs(1)).await;
    app.hub.stop().await;
}

#[tokio::test]
async fn test_external_producer_forwarded_exactly() {
    let settings = hub_settings();
    let (app, _sub) = start_hub(settings.clone()).await;
    let ctx = Context::new();
    let mut sub_socket = consumer(&ctx, &settings).await;
    let producer = ctx
        .connect(SocketType::Pub, &settings.ingress_bind, &SocketOptions::default())
        .await
        .unwrap();

    let message = vec![
        Bytes::from_static(b"t"),
        Bytes::new(),
        Bytes::from(vec![0xffu8; 300]),
        Bytes::from_static(b"tail"),
    ];
    let deadline = Instant::now() + WAIT;
    let received = loop {
        assert!(Instant::now() < deadline, "nothing forwarded");
        producer.send(message.clone()).await.unwrap();
        if let Ok(Ok(frames)) =
            tokio::time::timeout(Duration::from_millis(100), sub_socket.recv()).await
        {
            break frames;
        }
    };
    assert_eq!(received, message);
    assert!(app.hub.broker().stats().messages_forwarded >= 1);

    ctx.terminate(Duration::from_secs(1)).await;
    app.hub.stop().await;
}

#[tokio::test]
async fn test_producer_lifecycle_events() {
    // keep the injection publisher off the ingress endpoint
    let settings = hub_settings().inject_connect(format!("tcp://127.0.0.1:{}", free_port()));
    let (app, sub) = start_hub(settings.clone()).await;

    let ctx = Context::new();
    let producer = ctx
        .connect(SocketType::Pub, &settings.ingress_bind, &SocketOptions::default())
        .await
        .unwrap();
    producer.close(Duration::ZERO).await;

    // producer connect surfaces as "accepted" and its close as "disconnected";
    // a "handshake_succeeded" notice may sit between them
    let is_ingress_monitor = |v: &Value| v["kind"] == "monitor" && v["source"] == "ingress";
    let mut names = Vec::new();
    while !names.iter().any(|n| n == "disconnected") {
        let event = next_json(&sub, is_ingress_monitor).await;
        assert!(event["topic"].is_null());
        assert!(event["payload"].is_null());
        names.push(event["meta"]["event"].as_str().unwrap().to_owned());
    }

    let accepted = names.iter().position(|n| n == "accepted").unwrap();
    let disconnected = names.iter().position(|n| n == "disconnected").unwrap();
    assert!(accepted < disconnected);

    ctx.terminate(Duration::from_secs(1)).await;
    app.hub.stop().await;
}

#[tokio::test]
async fn test_rejected_publish_forwards_nothing() {
    let settings = hub_settings();
    let (app, sub) = start_hub(settings.clone()).await;
    let ctx = Context::new();
    let mut sub_socket = consumer(&ctx, &settings).await;

    let reply = control::answer(&app, r#"{"action":"publish","topic":""}"#).await;
    assert_eq!(reply["ok"], false);
    assert!(!reply["error"].as_str().unwrap().is_empty());

    assert!(
        tokio::time::timeout(Duration::from_millis(300), sub_socket.recv())
            .await
            .is_err()
    );
    while let Some(event) = sub.try_recv() {
        assert!(matches!(event.body, EventBody::Monitor(_)));
    }

    ctx.terminate(Duration::from_secs(1)).await;
    app.hub.stop().await;
}

#[tokio::test]
async fn test_stop_with_connected_peers_is_bounded() {
    let settings = hub_settings();
    let (app, _sub) = start_hub(settings.clone()).await;
    let ctx = Context::new();
    let _consumer = consumer(&ctx, &settings).await;
    let _producer = ctx
        .connect(SocketType::Pub, &settings.ingress_bind, &SocketOptions::default())
        .await
        .unwrap();

    let began = Instant::now();
    app.hub.stop().await;
    assert!(began.elapsed() < Duration::from_secs(5));
    assert!(!app.hub.is_running().await);

    ctx.terminate(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_healthz_over_http() {
    let settings = hub_settings();
    let (app, _sub) = start_hub(settings).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, web::router(app.clone())).await.unwrap();
    });

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let health: Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["bus"]["subscribers"], 1);

    server.abort();
}
