// tests/unit_router_test.rs

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use unicon::core::events::{Event, EventBroadcaster, Subscription};
use unicon::core::handlers::{HandlerContext, HandlerRegistry, HandlerSettings, ProtocolHandler};
use unicon::core::model::{Connection, ConnectionPatch, ConnectionStatus, ProtocolType};
use unicon::core::router::RouterSettings;
use unicon::core::store::{ConnectionStore, MemoryStore};
use unicon::core::{OperationRequest, OperationRouter, UniconError};

const FAKE_OPERATIONS: &[&str] = &["echo", "sleep", "open", "crash"];

#[derive(Default)]
struct Counters {
    built: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Behaviour is driven by the connection config:
/// `failConnect` (error text), `connectDelayMs`, `leak` (keep sessions on disconnect).
struct FakeHandler {
    ctx: HandlerContext,
    counters: Arc<Counters>,
    sessions: usize,
}

#[async_trait]
impl ProtocolHandler for FakeHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = self.ctx.config["connectDelayMs"].as_u64() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(message) = self.ctx.config["failConnect"].as_str() {
            return Err(UniconError::Transport(message.to_string()));
        }
        Ok(json!({ "fake": true }))
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        if !self.ctx.config["leak"].as_bool().unwrap_or(false) {
            self.sessions = 0;
        }
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        match operation {
            "echo" => Ok(params),
            "sleep" => {
                let ms = params["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "slept": ms }))
            }
            "open" => {
                self.sessions += 1;
                Ok(json!({ "sessions": self.sessions }))
            }
            "crash" => panic!("handler crashed on purpose"),
            _ => unreachable!("router let through {operation}"),
        }
    }

    fn session_count(&self) -> usize {
        self.sessions
    }
}

struct Harness {
    router: OperationRouter,
    store: Arc<MemoryStore>,
    counters: Arc<Counters>,
    events: Subscription,
}

fn harness() -> Harness {
    let counters = Arc::new(Counters::default());
    let mut registry = HandlerRegistry::empty();
    let factory_counters = counters.clone();
    registry.register(ProtocolType::Rest, FAKE_OPERATIONS, move |ctx| {
        factory_counters.built.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeHandler {
            ctx,
            counters: factory_counters.clone(),
            sessions: 0,
        })
    });
    let store = Arc::new(MemoryStore::new());
    let broadcaster = EventBroadcaster::new(256);
    let events = broadcaster.subscribe();
    let router = OperationRouter::new(
        store.clone(),
        registry,
        broadcaster,
        HandlerSettings::default(),
        RouterSettings {
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(2),
        },
    );
    Harness {
        router,
        store,
        counters,
        events,
    }
}

fn drain(sub: &mut Subscription) -> Vec<Arc<Event>> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}

fn statuses(events: &[Arc<Event>], connection_id: &str) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.kind == "status" && e.connection_id.as_deref() == Some(connection_id))
        .filter_map(|e| e.field_str("status").map(str::to_string))
        .collect()
}

async fn create(h: &Harness, config: Value) -> String {
    h.router
        .create_connection("api", "rest", config, None)
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_create_requires_a_name() {
    let h = harness();
    let err = h
        .router
        .create_connection("  ", "rest", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, UniconError::InvalidParams(_)));
}

#[tokio::test]
async fn test_created_connection_starts_disconnected() {
    let h = harness();
    let id = create(&h, json!({ "baseUrl": "http://x" })).await;

    let listed = h.router.list_connections().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].status, ConnectionStatus::Disconnected);
    assert_eq!(h.router.get_connection(&id).await.unwrap().config["baseUrl"], "http://x");
    assert!(matches!(
        h.router.get_connection("missing").await,
        Err(UniconError::ConnectionNotFound(_))
    ));
}

#[tokio::test]
async fn test_invoke_requires_an_active_connection() {
    let h = harness();
    let id = create(&h, json!({})).await;

    let err = h
        .router
        .invoke(OperationRequest::new(&id, "echo", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, UniconError::NotActive(_)));

    let response = h
        .router
        .handle(OperationRequest::new("nobody", "echo", json!({})))
        .await;
    assert!(!response.success);
    assert_eq!(response.code.as_deref(), Some("NOT_ACTIVE"));
    assert!(response.hint.is_some());
    assert_eq!(h.counters.built.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connect_invoke_disconnect_lifecycle() {
    let mut h = harness();
    let id = create(&h, json!({})).await;

    let outcome = h.router.connect(&id).await.unwrap();
    assert_eq!(outcome.status, ConnectionStatus::Connected);
    assert!(!outcome.already_connected);
    assert_eq!(outcome.detail["fake"], true);
    assert_eq!(h.router.status(&id).await, ConnectionStatus::Connected);
    assert_eq!(
        h.store.get(&id).await.unwrap().unwrap().status,
        ConnectionStatus::Connected
    );

    let echoed = h
        .router
        .invoke(OperationRequest::new(&id, "echo", json!({ "hello": "world" })))
        .await
        .unwrap();
    assert_eq!(echoed, json!({ "hello": "world" }));

    let outcome = h.router.disconnect(&id).await.unwrap();
    assert!(outcome.was_active);
    assert_eq!(h.router.status(&id).await, ConnectionStatus::Disconnected);
    assert_eq!(
        h.store.get(&id).await.unwrap().unwrap().status,
        ConnectionStatus::Disconnected
    );
    assert!(matches!(
        h.router.invoke(OperationRequest::new(&id, "echo", json!({}))).await,
        Err(UniconError::NotActive(_))
    ));

    let events = drain(&mut h.events);
    assert_eq!(
        statuses(&events, &id),
        vec!["connecting", "connected", "disconnected"]
    );
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let mut h = harness();
    let id = create(&h, json!({})).await;

    h.router.connect(&id).await.unwrap();
    let again = h.router.connect(&id).await.unwrap();
    assert!(again.already_connected);
    assert_eq!(h.counters.built.load(Ordering::SeqCst), 1);

    let events = drain(&mut h.events);
    let connected = statuses(&events, &id)
        .into_iter()
        .filter(|s| s == "connected")
        .count();
    assert_eq!(connected, 1);
}

#[tokio::test]
async fn test_concurrent_connects_build_one_handler() {
    let h = harness();
    let id = create(&h, json!({ "connectDelayMs": 50 })).await;

    let (a, b, c) = tokio::join!(
        h.router.connect(&id),
        h.router.connect(&id),
        h.router.connect(&id)
    );
    let outcomes = [a.unwrap(), b.unwrap(), c.unwrap()];
    assert_eq!(outcomes.iter().filter(|o| !o.already_connected).count(), 1);
    assert_eq!(h.counters.built.load(Ordering::SeqCst), 1);
    assert_eq!(h.counters.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_undeclared_operation_is_rejected_by_the_router() {
    let mut h = harness();
    let id = create(&h, json!({})).await;
    h.router.connect(&id).await.unwrap();
    drain(&mut h.events);

    let err = h
        .router
        .invoke(OperationRequest::new(&id, "explode", json!({})))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        UniconError::UnknownOperation {
            protocol: "rest".into(),
            operation: "explode".into(),
        }
    );
    assert!(drain(&mut h.events).is_empty());
    assert_eq!(h.router.session_count(&id).await.unwrap(), 0);
    assert_eq!(
        h.router
            .invoke(OperationRequest::new(&id, "echo", json!(2)))
            .await
            .unwrap(),
        json!(2)
    );
}

#[tokio::test]
async fn test_crashed_actor_reports_not_active() {
    let h = harness();
    let id = create(&h, json!({})).await;
    h.router.connect(&id).await.unwrap();

    let err = h
        .router
        .invoke(OperationRequest::new(&id, "crash", json!({})))
        .await
        .unwrap_err();
    assert_eq!(err, UniconError::NotActive(id.clone()));

    let err = h
        .router
        .invoke(OperationRequest::new(&id, "echo", json!({})))
        .await
        .unwrap_err();
    assert_eq!(err, UniconError::NotActive(id.clone()));
    assert_eq!(
        h.router.session_count(&id).await.unwrap_err(),
        UniconError::NotActive(id.clone())
    );
}

#[tokio::test]
async fn test_operation_deadline_does_not_kill_the_connection() {
    let h = harness();
    let id = create(&h, json!({})).await;
    h.router.connect(&id).await.unwrap();

    let err = h
        .router
        .invoke(OperationRequest::new(&id, "sleep", json!({ "ms": 2000 })).with_timeout_ms(50))
        .await
        .unwrap_err();
    assert!(matches!(err, UniconError::Timeout(_)));

    assert_eq!(h.router.status(&id).await, ConnectionStatus::Connected);
    let ok = h
        .router
        .invoke(OperationRequest::new(&id, "echo", json!(1)))
        .await
        .unwrap();
    assert_eq!(ok, json!(1));
}

#[tokio::test]
async fn test_failed_connect_reports_classified_error() {
    let mut h = harness();
    let id = create(&h, json!({ "failConnect": "connect ECONNREFUSED 10.0.0.9:443" })).await;

    let err = h.router.connect(&id).await.unwrap_err();
    assert!(matches!(err, UniconError::Transport(_)));
    assert_eq!(h.router.status(&id).await, ConnectionStatus::Disconnected);
    assert!(h.router.active_connections().await.is_empty());
    // The half-built handler was given the chance to clean up.
    assert_eq!(h.counters.disconnects.load(Ordering::SeqCst), 1);

    let events = drain(&mut h.events);
    assert_eq!(statuses(&events, &id), vec!["connecting", "disconnected"]);
    let failure = events
        .iter()
        .find(|e| e.kind == "log" && e.field_str("level") == Some("error"))
        .unwrap();
    assert_eq!(failure.field_str("code"), Some("REST_CONNECTION_REFUSED"));
    assert!(failure.field_str("hint").is_some());
}

#[tokio::test]
async fn test_connect_timeout() {
    let h = harness();
    let id = create(&h, json!({ "connectDelayMs": 2000 })).await;

    let err = h
        .router
        .connect_with_timeout(&id, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, UniconError::Timeout(_)));
    assert_eq!(h.router.status(&id).await, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_unregistered_protocol_is_unsupported() {
    let mut h = harness();
    let id = h
        .router
        .create_connection("old", "gopher", json!({}), None)
        .await
        .unwrap()
        .id;

    let err = h.router.connect(&id).await.unwrap_err();
    assert_eq!(err, UniconError::UnsupportedProtocol("gopher".into()));
    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| e.field_str("code") == Some("UNSUPPORTED_PROTOCOL")));
}

#[tokio::test]
async fn test_disconnect_of_idle_connection_is_a_no_op() {
    let h = harness();
    let id = create(&h, json!({})).await;
    assert!(!h.router.disconnect(&id).await.unwrap().was_active);
    assert!(!h.router.disconnect("never-created").await.unwrap().was_active);
}

#[tokio::test]
async fn test_disconnect_drains_sessions() {
    let h = harness();
    let id = create(&h, json!({})).await;
    h.router.connect(&id).await.unwrap();
    for _ in 0..3 {
        h.router
            .invoke(OperationRequest::new(&id, "open", json!({})))
            .await
            .unwrap();
    }
    assert_eq!(h.router.session_count(&id).await.unwrap(), 3);

    h.router.disconnect(&id).await.unwrap();
    assert_eq!(h.router.session_count(&id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_leaked_sessions_are_reported() {
    let mut h = harness();
    let id = create(&h, json!({ "leak": true })).await;
    h.router.connect(&id).await.unwrap();
    h.router
        .invoke(OperationRequest::new(&id, "open", json!({})))
        .await
        .unwrap();
    drain(&mut h.events);

    h.router.disconnect(&id).await.unwrap();
    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| e.field_str("code") == Some("SESSION_LEAK")));
}

#[tokio::test]
async fn test_protocol_type_is_immutable() {
    let h = harness();
    let id = create(&h, json!({})).await;

    let err = h
        .router
        .update_connection(
            &id,
            ConnectionPatch {
                protocol_type: Some("soap".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, UniconError::ImmutableField("protocolType".into()));

    let updated = h
        .router
        .update_connection(
            &id,
            ConnectionPatch {
                name: Some("renamed".into()),
                protocol_type: Some("rest".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "renamed");
}

#[tokio::test]
async fn test_delete_disconnects_live_connection() {
    let h = harness();
    let id = create(&h, json!({})).await;
    h.router.connect(&id).await.unwrap();

    assert!(h.router.delete_connection(&id).await.unwrap());
    assert_eq!(h.counters.disconnects.load(Ordering::SeqCst), 1);
    assert!(h.router.list_connections().await.unwrap().is_empty());
    assert!(h.router.active_connections().await.is_empty());
}

#[tokio::test]
async fn test_reset_statuses_after_restart() {
    let h = harness();
    let mut stale = Connection::new("plc", "opcua", json!({}), None);
    stale.status = ConnectionStatus::Connected;
    h.store.upsert(stale.clone()).await.unwrap();

    assert_eq!(h.router.reset_statuses().await.unwrap(), 1);
    assert_eq!(
        h.store.get(&stale.id).await.unwrap().unwrap().status,
        ConnectionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_disconnect_all() {
    let h = harness();
    let a = create(&h, json!({})).await;
    let b = create(&h, json!({})).await;
    let _idle = create(&h, json!({})).await;
    h.router.connect(&a).await.unwrap();
    h.router.connect(&b).await.unwrap();

    assert_eq!(h.router.disconnect_all().await, 2);
    assert!(h.router.active_connections().await.is_empty());
}
