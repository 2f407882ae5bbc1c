// tests/integration/log_stream_test.rs

//! Kubernetes log tails end to end: router, handler, child process and event
//! fan-out, with a scripted `kubectl` standing in for the real tool.

#![cfg(unix)]

use super::fixtures::{FAKE_KUBECTL, TestRouter, write_script};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use unicon::core::handlers::HandlerSettings;
use unicon::core::{ConnectionStatus, OperationRequest, UniconError};

fn setup() -> (TempDir, TestRouter) {
    let dir = TempDir::new().unwrap();
    let kubectl = write_script(dir.path(), "kubectl", FAKE_KUBECTL);
    let router = TestRouter::new(HandlerSettings {
        kubectl_path: Some(kubectl),
        ..Default::default()
    });
    (dir, router)
}

async fn connected(t: &TestRouter) -> String {
    let id = t.create("k8s", json!({ "namespace": "plant" })).await;
    let outcome = t.router.connect(&id).await.unwrap();
    assert_eq!(outcome.detail["context"], "dev");
    assert_eq!(outcome.detail["namespace"], "plant");
    id
}

#[tokio::test]
async fn test_log_lines_are_streamed_as_session_events() {
    let (_dir, mut t) = setup();
    let id = connected(&t).await;

    let started = t
        .router
        .invoke(OperationRequest::new(&id, "logsStart", json!({ "pod": "web-0" })))
        .await
        .unwrap();
    let session_id = started["sessionId"].as_str().unwrap().to_string();

    let mut stdout = Vec::new();
    let mut saw_stderr = false;
    while stdout.len() < 2 || !saw_stderr {
        let event = t
            .wait_for(|e| e.kind == "logLine" && e.session_id.as_deref() == Some(&session_id))
            .await;
        assert_eq!(event.connection_id.as_deref(), Some(id.as_str()));
        assert_eq!(event.field_str("pod"), Some("web-0"));
        assert_eq!(event.field_str("namespace"), Some("plant"));
        match event.field_str("stream") {
            Some("stdout") => stdout.push(event.field_str("line").unwrap().to_string()),
            Some("stderr") => saw_stderr = true,
            other => panic!("unexpected stream {other:?}"),
        }
    }
    assert_eq!(stdout, vec!["line one", "line two"]);
    assert_eq!(t.router.session_count(&id).await.unwrap(), 1);

    let stopped = t
        .router
        .invoke(OperationRequest::new(&id, "logsStop", json!({ "sessionId": session_id })))
        .await
        .unwrap();
    assert_eq!(stopped["stopped"], true);
    let closed = t
        .wait_for(|e| e.kind == "logClosed" && e.session_id.as_deref() == Some(&session_id))
        .await;
    assert_eq!(closed.field_str("reason"), Some("stopped"));
    assert_eq!(t.router.session_count(&id).await.unwrap(), 0);

    // Nothing may be published for the session after its close event.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let late = std::iter::from_fn(|| t.events.try_recv())
        .filter(|e| e.session_id.as_deref() == Some(session_id.as_str()))
        .count();
    assert_eq!(late, 0);

    t.router.disconnect(&id).await.unwrap();
    assert_eq!(
        t.router.get_connection(&id).await.unwrap().status,
        ConnectionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_finished_tail_is_reaped() {
    let (_dir, mut t) = setup();
    let id = connected(&t).await;

    let started = t
        .router
        .invoke(OperationRequest::new(
            &id,
            "logsStart",
            json!({ "pod": "job-1", "follow": false }),
        ))
        .await
        .unwrap();
    let session_id = started["sessionId"].as_str().unwrap().to_string();

    let closed = t
        .wait_for(|e| e.kind == "logClosed" && e.session_id.as_deref() == Some(&session_id))
        .await;
    assert_eq!(closed.field_str("reason"), Some("exited"));
    assert_eq!(closed.payload["code"], 0);

    let listed = t
        .router
        .invoke(OperationRequest::new(&id, "listSessions", json!({})))
        .await
        .unwrap();
    assert_eq!(listed["sessions"], json!([]));
}

#[tokio::test]
async fn test_disconnect_stops_live_tails() {
    let (_dir, mut t) = setup();
    let id = connected(&t).await;

    let mut sessions = Vec::new();
    for pod in ["a", "b"] {
        let started = t
            .router
            .invoke(OperationRequest::new(&id, "logsStart", json!({ "pod": pod })))
            .await
            .unwrap();
        sessions.push(started["sessionId"].as_str().unwrap().to_string());
    }
    assert_eq!(t.router.session_count(&id).await.unwrap(), 2);

    assert!(t.router.disconnect(&id).await.unwrap().was_active);
    let mut open = sessions.clone();
    while !open.is_empty() {
        let closed = t
            .wait_for(|e| {
                e.kind == "logClosed"
                    && e.session_id.as_ref().is_some_and(|s| sessions.contains(s))
            })
            .await;
        open.retain(|s| Some(s) != closed.session_id.as_ref());
    }
    // Every session was released, so no leak was reported.
    while let Some(event) = t.events.try_recv() {
        assert_ne!(event.field_str("code"), Some("SESSION_LEAK"));
    }
}

#[tokio::test]
async fn test_context_switching() {
    let (_dir, t) = setup();
    let id = connected(&t).await;

    let contexts = t
        .router
        .invoke(OperationRequest::new(&id, "listContexts", json!({})))
        .await
        .unwrap();
    assert_eq!(contexts, json!({ "contexts": ["dev", "prod"], "current": "dev" }));

    let switched = t
        .router
        .invoke(OperationRequest::new(&id, "useContext", json!({ "context": "prod" })))
        .await
        .unwrap();
    assert_eq!(switched["current"], "prod");

    let err = t
        .router
        .invoke(OperationRequest::new(&id, "useContext", json!({ "context": "staging" })))
        .await
        .unwrap_err();
    assert!(matches!(err, UniconError::Remote { .. }));
}

#[tokio::test]
async fn test_unknown_context_fails_connect() {
    let (_dir, mut t) = setup();
    let id = t.create("k8s", json!({ "context": "staging" })).await;

    assert!(t.router.connect(&id).await.is_err());
    let failure = t
        .wait_for(|e| e.kind == "log" && e.field_str("level") == Some("error"))
        .await;
    assert!(failure.field_str("message").unwrap().contains("staging"));
    assert!(t.router.active_connections().await.is_empty());
}

#[tokio::test]
async fn test_failing_kubectl_call_surfaces_stderr() {
    let (_dir, t) = setup();
    let id = connected(&t).await;

    let err = t
        .router
        .invoke(OperationRequest::new(&id, "listNamespaces", json!({})))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown command"), "{err}");
}
