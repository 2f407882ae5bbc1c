// tests/integration/process_stream_test.rs

//! Chunk-framed child output, as used by exec sessions.

#![cfg(unix)]

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use unicon::core::events::EventBroadcaster;
use unicon::core::handlers::process::{Framing, ProcessSession, ProcessSpec, StreamEvents};
use unicon::core::handlers::{HandlerContext, HandlerSettings};
use unicon::core::model::ProtocolType;
use unicon::core::session::SessionResource;

fn context(events: EventBroadcaster) -> HandlerContext {
    HandlerContext {
        connection_id: "k8s-1".into(),
        protocol: ProtocolType::Kubernetes,
        config: json!({}),
        events,
        settings: Arc::new(HandlerSettings::default()),
    }
}

#[tokio::test]
async fn test_character_split_across_writes_is_reassembled() {
    let events = EventBroadcaster::new(64);
    let mut sub = events.subscribe();
    let ctx = context(events);
    let spec = ProcessSpec {
        program: "/bin/sh".into(),
        args: vec![
            "-c".into(),
            r"printf '\303'; sleep 0.3; printf '\251\n'".into(),
        ],
        interactive: false,
        framing: Framing::Chunks,
        events: StreamEvents {
            output: "execData",
            closed: "execClosed",
        },
        tags: json!({}),
    };
    let mut session = ProcessSession::spawn("exec", spec, &ctx, "exec-1").unwrap();

    let mut text = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = sub.recv().await.unwrap();
            match event.kind.as_str() {
                "execData" => {
                    assert_eq!(event.field_str("stream"), Some("stdout"));
                    text.push_str(event.field_str("data").unwrap());
                }
                "execClosed" => break,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(text, "é\n");
    assert!(!text.contains('\u{FFFD}'));
    session.terminate().await;
}
