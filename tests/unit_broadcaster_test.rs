// tests/unit_broadcaster_test.rs

use serde_json::json;
use unicon::core::events::{Event, EventBroadcaster};

#[tokio::test]
async fn test_every_observer_gets_every_event() {
    let events = EventBroadcaster::new(16);
    let mut a = events.subscribe();
    let mut b = events.subscribe();

    assert_eq!(events.publish(Event::status("c1", "connected")), 2);

    for sub in [&mut a, &mut b] {
        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, "status");
        assert_eq!(event.field_str("status"), Some("connected"));
    }
}

#[tokio::test]
async fn test_publish_without_observers_is_fine() {
    let events = EventBroadcaster::new(16);
    assert_eq!(events.publish(Event::log(None, "info", "nobody listening")), 0);
}

#[tokio::test]
async fn test_late_subscriber_sees_no_replay() {
    let events = EventBroadcaster::new(16);
    events.publish(Event::log(Some("c1"), "info", "early"));
    let mut late = events.subscribe();
    assert!(late.try_recv().is_none());

    events.publish(Event::log(Some("c1"), "info", "later"));
    assert_eq!(late.try_recv().unwrap().field_str("message"), Some("later"));
}

#[tokio::test]
async fn test_unsubscribe_and_drop_remove_observers() {
    let events = EventBroadcaster::new(16);
    let a = events.subscribe();
    let b = events.subscribe();
    assert_ne!(a.id(), b.id());
    assert_eq!(events.observer_count(), 2);

    events.unsubscribe(a);
    assert_eq!(events.observer_count(), 1);
    drop(b);
    assert_eq!(events.observer_count(), 0);
}

#[tokio::test]
async fn test_events_arrive_in_publish_order() {
    let events = EventBroadcaster::new(64);
    let mut sub = events.subscribe();
    for i in 0..10 {
        events.publish(Event::new("tick", None).with("n", i));
    }
    for i in 0..10 {
        let event = sub.recv().await.unwrap();
        assert_eq!(event.payload["n"], json!(i));
    }
}

#[tokio::test]
async fn test_lagging_observer_skips_instead_of_blocking() {
    let events = EventBroadcaster::new(4);
    let mut slow = events.subscribe();
    for i in 0..20 {
        events.publish(Event::new("tick", None).with("n", i));
    }
    let first = slow.recv().await.unwrap();
    assert!(first.payload["n"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_recv_ends_when_broadcaster_is_dropped() {
    let events = EventBroadcaster::new(4);
    let mut sub = events.subscribe();
    drop(events);
    assert!(sub.recv().await.is_none());
}

#[test]
fn test_event_json_shape() {
    let event = Event::error_log(Some("c1"), "boom", "SSH_TIMEOUT", "check the host")
        .with_session("s1")
        .with_fields(json!({ "extra": 1 }));
    let value = event.to_json();

    assert_eq!(value["type"], "log");
    let data = &value["data"];
    assert_eq!(data["connectionId"], "c1");
    assert_eq!(data["sessionId"], "s1");
    assert_eq!(data["level"], "error");
    assert_eq!(data["message"], "boom");
    assert_eq!(data["code"], "SSH_TIMEOUT");
    assert_eq!(data["hint"], "check the host");
    assert_eq!(data["extra"], 1);
    assert!(data["timestamp"].is_string());
}

#[test]
fn test_with_fields_ignores_non_objects() {
    let event = Event::new("x", None).with_fields(json!([1, 2, 3]));
    assert!(event.payload.is_empty());
    assert!(event.to_json()["data"].get("connectionId").is_none());
}
