// tests/integration/fixtures.rs

//! Shared setup for the end-to-end tests: a router over an in-memory store
//! with every built-in handler registered, plus helpers for waiting on events.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use unicon::core::OperationRouter;
use unicon::core::events::{Event, EventBroadcaster, Subscription};
use unicon::core::handlers::{HandlerRegistry, HandlerSettings};
use unicon::core::router::RouterSettings;
use unicon::core::store::MemoryStore;

/// How long a test waits for an expected event before failing.
pub const EVENT_WAIT: Duration = Duration::from_secs(10);

pub struct TestRouter {
    pub router: Arc<OperationRouter>,
    pub events: Subscription,
}

impl TestRouter {
    pub fn new(settings: HandlerSettings) -> Self {
        let broadcaster = EventBroadcaster::new(1024);
        let events = broadcaster.subscribe();
        let router = OperationRouter::new(
            Arc::new(MemoryStore::new()),
            HandlerRegistry::with_defaults(),
            broadcaster,
            settings,
            RouterSettings {
                connect_timeout: Duration::from_secs(10),
                operation_timeout: Duration::from_secs(10),
                disconnect_timeout: Duration::from_secs(5),
            },
        );
        Self {
            router: Arc::new(router),
            events,
        }
    }

    /// Creates a connection and returns its id.
    pub async fn create(&self, protocol: &str, config: Value) -> String {
        self.router
            .create_connection("fixture", protocol, config, None)
            .await
            .unwrap()
            .id
    }

    /// Waits for the first event matching `pred`, skipping everything else.
    pub async fn wait_for(&mut self, pred: impl Fn(&Event) -> bool) -> Arc<Event> {
        tokio::time::timeout(EVENT_WAIT, async {
            loop {
                match self.events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event broadcaster closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

/// A stand-in `kubectl`: knows two contexts, and streams two stdout lines and
/// one stderr line for `logs`. With `-f` it then blocks like a live tail.
pub const FAKE_KUBECTL: &str = r#"#!/bin/sh
case " $* " in
  *" get-contexts "*)
    printf 'dev\nprod\n'
    ;;
  *" current-context "*)
    echo dev
    ;;
  *" logs "*)
    echo "line one"
    echo "line two"
    echo "warning: from stderr" >&2
    case " $* " in
      *" -f "*) exec sleep 30 ;;
    esac
    ;;
  *)
    echo "error: unknown command $*" >&2
    exit 1
    ;;
esac
"#;

/// Writes an executable script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
