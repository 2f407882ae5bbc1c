// tests/integration/front_door_test.rs

//! The JSON-lines front door over a real TCP socket.

use super::fixtures::TestRouter;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};
use unicon::connection::ConnectionHandler;
use unicon::core::handlers::HandlerSettings;

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
    next_id: u64,
    /// Event frames seen while waiting for responses.
    events: Vec<Value>,
}

impl Client {
    async fn send_raw(&mut self, line: &str) {
        self.framed.send(line.to_string()).await.unwrap();
    }

    async fn read_frame(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(Duration::from_secs(10), self.framed.next())
            .await
            .expect("timed out waiting for a frame")?
            .unwrap();
        Some(serde_json::from_str(&line).unwrap())
    }

    /// Reads until the response with `id`, buffering event frames.
    async fn response(&mut self, id: &Value) -> Value {
        loop {
            let frame = self.read_frame().await.expect("server closed the stream");
            if frame.get("event").is_some() {
                self.events.push(frame);
            } else if frame["id"] == *id {
                return frame;
            }
        }
    }

    async fn call(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = json!(self.next_id);
        let request = json!({ "id": id, "method": method, "params": params });
        self.send_raw(&request.to_string()).await;
        self.response(&id).await
    }

    async fn wait_event(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
        if let Some(i) = self.events.iter().position(&pred) {
            return self.events.remove(i);
        }
        loop {
            let frame = self.read_frame().await.expect("server closed the stream");
            if frame.get("event").is_some() && pred(&frame) {
                return frame;
            }
        }
    }
}

struct FrontDoor {
    client: Client,
    shutdown: broadcast::Sender<()>,
}

async fn start() -> FrontDoor {
    let router = TestRouter::new(HandlerSettings::default()).router;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, _) = broadcast::channel(1);

    let shutdown_tx = shutdown.clone();
    tokio::spawn(async move {
        let mut client_id = 0;
        while let Ok((socket, peer)) = listener.accept().await {
            client_id += 1;
            let mut handler =
                ConnectionHandler::new(socket, peer, router.clone(), client_id, shutdown_tx.subscribe());
            tokio::spawn(async move {
                let _ = handler.run().await;
            });
        }
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    FrontDoor {
        client: Client {
            framed: Framed::new(stream, LinesCodec::new()),
            next_id: 0,
            events: Vec::new(),
        },
        shutdown,
    }
}

#[tokio::test]
async fn test_ping() {
    let mut door = start().await;
    let response = door.client.call("ping", Value::Null).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["data"]["pong"], true);
}

#[tokio::test]
async fn test_connection_crud() {
    let mut door = start().await;
    let c = &mut door.client;

    let created = c
        .call(
            "connections.create",
            json!({ "name": "historian", "type": "sql", "config": { "driver": "sqlite" } }),
        )
        .await;
    assert_eq!(created["success"], true);
    let id = created["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["type"], "sql");
    assert_eq!(created["data"]["status"], "disconnected");

    let listed = c.call("connections.list", Value::Null).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let renamed = c
        .call("connections.update", json!({ "connectionId": id, "name": "historian-2" }))
        .await;
    assert_eq!(renamed["data"]["name"], "historian-2");

    let immutable = c
        .call("connections.update", json!({ "connectionId": id, "protocolType": "rest" }))
        .await;
    assert_eq!(immutable["success"], false);
    assert_eq!(immutable["code"], "IMMUTABLE_FIELD");

    let deleted = c.call("connections.delete", json!({ "connectionId": id })).await;
    assert_eq!(deleted["data"]["deleted"], true);

    let missing = c.call("connections.get", json!({ "connectionId": id })).await;
    assert_eq!(missing["code"], "CONNECTION_NOT_FOUND");
}

#[tokio::test]
async fn test_operation_requires_connect() {
    let mut door = start().await;
    let c = &mut door.client;

    let created = c
        .call("connections.create", json!({ "name": "db", "type": "sql", "config": {} }))
        .await;
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let response = c
        .call(
            "operation",
            json!({ "connectionId": id, "operation": "tables", "params": {} }),
        )
        .await;
    assert_eq!(response["success"], false);
    assert_eq!(response["code"], "NOT_ACTIVE");
    assert!(response["hint"].is_string());
}

#[tokio::test]
async fn test_subscribed_client_sees_status_and_results() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("setpoints.csv"), b"tag,value\n").unwrap();
    let mut door = start().await;
    let c = &mut door.client;

    let subscribed = c.call("subscribe", Value::Null).await;
    assert_eq!(subscribed["data"]["subscribed"], true);

    let created = c
        .call(
            "connections.create",
            json!({ "name": "share", "type": "localfs", "config": { "root": dir.path() } }),
        )
        .await;
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let connected = c.call("connect", json!({ "connectionId": id })).await;
    assert_eq!(connected["success"], true);
    assert_eq!(connected["data"]["status"], "connected");

    let status = c
        .wait_event(|f| {
            f["event"]["type"] == "status" && f["event"]["data"]["status"] == "connected"
        })
        .await;
    assert_eq!(status["event"]["data"]["connectionId"], id.as_str());

    let listing = c
        .call(
            "operation",
            json!({ "connectionId": id, "operation": "list", "params": { "path": "." } }),
        )
        .await;
    assert_eq!(listing["success"], true);
    assert_eq!(listing["data"][0]["name"], "setpoints.csv");

    let escape = c
        .call(
            "operation",
            json!({ "connectionId": id, "operation": "download", "params": { "path": "../x" } }),
        )
        .await;
    assert_eq!(escape["success"], false);

    let unknown = c
        .call(
            "operation",
            json!({ "connectionId": id, "operation": "format", "params": {} }),
        )
        .await;
    assert_eq!(unknown["code"], "UNKNOWN_OPERATION");

    let disconnected = c.call("disconnect", json!({ "connectionId": id })).await;
    assert_eq!(disconnected["data"]["wasActive"], true);

    let unsubscribed = c.call("unsubscribe", Value::Null).await;
    assert_eq!(unsubscribed["data"]["unsubscribed"], true);
}

#[tokio::test]
async fn test_bad_frames_get_error_responses() {
    let mut door = start().await;
    let c = &mut door.client;

    c.send_raw("this is not json").await;
    let malformed = c.response(&Value::Null).await;
    assert_eq!(malformed["success"], false);
    assert_eq!(malformed["code"], "INVALID_PARAMS");

    let unknown = c.call("reboot", Value::Null).await;
    assert_eq!(unknown["success"], false);
    assert!(unknown["error"].as_str().unwrap().contains("reboot"));

    // The stream is still usable.
    assert_eq!(c.call("ping", Value::Null).await["success"], true);
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let mut door = start().await;
    assert_eq!(door.client.call("ping", Value::Null).await["success"], true);

    door.shutdown.send(()).unwrap();
    assert!(door.client.read_frame().await.is_none());
}
