// tests/unit_timeout_floor_test.rs

//! A `timeoutMs` of 0 is raised to 1 ms instead of producing a zero deadline.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use unicon::core::UniconError;
use unicon::core::events::EventBroadcaster;
use unicon::core::handlers::rest::RestHandler;
use unicon::core::handlers::websocket::WebSocketHandler;
use unicon::core::handlers::{HandlerContext, HandlerSettings, ProtocolHandler};
use unicon::core::model::ProtocolType;

fn context(protocol: ProtocolType, config: Value) -> HandlerContext {
    HandlerContext {
        connection_id: "svc-1".into(),
        protocol,
        config,
        events: EventBroadcaster::default(),
        settings: Arc::new(HandlerSettings::default()),
    }
}

/// Accepts connections and never answers.
async fn silent_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[tokio::test]
async fn test_websocket_zero_timeout_uses_one_millisecond() {
    let (_listener, port) = silent_listener().await;
    let mut h = WebSocketHandler::new(context(
        ProtocolType::WebSocket,
        json!({ "url": format!("ws://127.0.0.1:{port}/feed"), "timeoutMs": 0 }),
    ));

    let err = tokio::time::timeout(Duration::from_secs(5), h.connect())
        .await
        .unwrap()
        .unwrap_err();
    match err {
        UniconError::Timeout(message) => assert!(message.contains("after 1 ms"), "{message}"),
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rest_zero_timeout_fails_fast_as_timeout() {
    let (_listener, port) = silent_listener().await;
    let mut h = RestHandler::new(context(
        ProtocolType::Rest,
        json!({ "baseUrl": format!("http://127.0.0.1:{port}"), "timeoutMs": 0 }),
    ));

    let err = tokio::time::timeout(Duration::from_secs(5), h.connect())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, UniconError::Timeout(_)), "{err:?}");
}
