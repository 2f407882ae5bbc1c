// tests/unit_session_registry_test.rs

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use unicon::core::session::{SessionRegistry, SessionResource};

struct FakeSession {
    label: &'static str,
    terminated: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    terminations: Arc<AtomicUsize>,
}

impl FakeSession {
    fn new(label: &'static str) -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
        let terminated = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let session = Self {
            label,
            terminated: terminated.clone(),
            finished: finished.clone(),
            terminations: Arc::new(AtomicUsize::new(0)),
        };
        (session, terminated, finished)
    }
}

#[async_trait]
impl SessionResource for FakeSession {
    fn kind(&self) -> &'static str {
        "fake"
    }

    async fn terminate(&mut self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.terminated.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn describe(&self) -> Value {
        json!({ "label": self.label })
    }
}

#[tokio::test]
async fn test_register_generates_unique_ids() {
    let mut registry = SessionRegistry::new();
    let (a, _, _) = FakeSession::new("a");
    let (b, _, _) = FakeSession::new("b");
    let id_a = registry.register(a);
    let id_b = registry.register(b);

    assert_ne!(id_a, id_b);
    assert_eq!(registry.len(), 2);
    assert!(registry.contains(&id_a));
    assert_eq!(registry.ids(), vec![id_a, id_b]);
}

#[tokio::test]
async fn test_remove_terminates_the_resource() {
    let mut registry = SessionRegistry::new();
    let (session, terminated, _) = FakeSession::new("shell");
    let id = registry.register(session);

    assert!(registry.remove(&id).await);
    assert!(terminated.load(Ordering::SeqCst));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_remove_unknown_id_is_a_no_op() {
    let mut registry: SessionRegistry<FakeSession> = SessionRegistry::new();
    assert!(!registry.remove("nope").await);
}

#[tokio::test]
async fn test_drain_terminates_everything() {
    let mut registry = SessionRegistry::new();
    let mut flags = Vec::new();
    for label in ["a", "b", "c"] {
        let (session, terminated, _) = FakeSession::new(label);
        flags.push(terminated);
        registry.register(session);
    }

    assert_eq!(registry.drain().await, 3);
    assert!(registry.is_empty());
    assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
    assert_eq!(registry.drain().await, 0);
}

#[tokio::test]
async fn test_reap_drops_finished_sessions_only() {
    let mut registry = SessionRegistry::new();
    let (done, done_terminated, done_flag) = FakeSession::new("done");
    let (live, _, _) = FakeSession::new("live");
    let done_id = registry.register(done);
    let live_id = registry.register(live);

    done_flag.store(true, Ordering::SeqCst);
    assert_eq!(registry.reap(), vec![done_id.clone()]);
    assert!(!registry.contains(&done_id));
    assert!(registry.contains(&live_id));
    assert!(!done_terminated.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_insert_under_preallocated_id() {
    let mut registry = SessionRegistry::new();
    let id = SessionRegistry::<FakeSession>::next_id();
    let (session, _, _) = FakeSession::new("tail");
    registry.insert(id.clone(), session);

    assert_eq!(registry.get(&id).map(|s| s.label), Some("tail"));
    assert!(registry.get_mut(&id).is_some());
}

#[tokio::test]
async fn test_list_merges_describe_fields() {
    let mut registry = SessionRegistry::new();
    let (session, _, _) = FakeSession::new("exec");
    let id = registry.register(session);

    let rows = registry.list();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["sessionId"], json!(id));
    assert_eq!(rows[0]["kind"], "fake");
    assert_eq!(rows[0]["label"], "exec");
    assert_eq!(rows[0]["finished"], false);
    assert!(rows[0]["openedAt"].is_string());
}

#[tokio::test]
async fn test_removed_session_is_terminated_once() {
    let mut registry = SessionRegistry::new();
    let (session, _, _) = FakeSession::new("once");
    let counter = session.terminations.clone();
    let id = registry.register(session);

    registry.remove(&id).await;
    registry.remove(&id).await;
    registry.drain().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
