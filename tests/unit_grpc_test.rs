// tests/unit_grpc_test.rs

use bytes::BytesMut;
use serde_json::json;
use std::sync::Arc;
use tokio_util::codec::Decoder;
use unicon::core::UniconError;
use unicon::core::events::EventBroadcaster;
use unicon::core::handlers::grpc::{GrpcHandler, parse_messages};
use unicon::core::handlers::{HandlerContext, HandlerSettings, ProtocolHandler};
use unicon::core::model::ProtocolType;
use unicon::core::protocol::jsonl::{DocumentFrame, JsonDocumentCodec};

#[test]
fn test_parse_concatenated_pretty_documents() {
    let stdout = "{\n  \"name\": \"a\"\n}\n{\n  \"name\": \"b\"\n}\n";
    assert_eq!(
        parse_messages(stdout).unwrap(),
        vec![json!({ "name": "a" }), json!({ "name": "b" })]
    );
}

#[test]
fn test_parse_empty_output() {
    assert!(parse_messages("").unwrap().is_empty());
    assert!(parse_messages("  \n").unwrap().is_empty());
}

#[test]
fn test_parse_malformed_output() {
    let err = parse_messages("{\"name\": ").unwrap_err();
    assert!(matches!(err, UniconError::Protocol(_)));
}

#[test]
fn test_document_codec_waits_for_complete_document() {
    let mut codec = JsonDocumentCodec;
    let mut buf = BytesMut::from("{\n  \"tick\": 1,\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"  \"ok\": true\n}\n{\"tick\": 2}");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(DocumentFrame::Document(json!({ "tick": 1, "ok": true })))
    );
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(DocumentFrame::Document(json!({ "tick": 2 })))
    );
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn test_document_codec_passes_text_through() {
    let mut codec = JsonDocumentCodec;
    let mut buf = BytesMut::from("ERROR:\n  Code: Unavailable\n{\"a\": 1}");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(DocumentFrame::Text("ERROR:".into()))
    );
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(DocumentFrame::Text("Code: Unavailable".into()))
    );
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(DocumentFrame::Document(json!({ "a": 1 })))
    );
}

#[test]
fn test_document_codec_flushes_trailing_text_at_eof() {
    let mut codec = JsonDocumentCodec;
    let mut buf = BytesMut::from("Failed to dial target host");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert_eq!(
        codec.decode_eof(&mut buf).unwrap(),
        Some(DocumentFrame::Text("Failed to dial target host".into()))
    );
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}

#[tokio::test]
async fn test_connect_without_grpcurl_reports_missing_tool() {
    let ctx = HandlerContext {
        connection_id: "g1".into(),
        protocol: ProtocolType::Grpc,
        config: json!({ "address": "127.0.0.1:50051", "plaintext": true }),
        events: EventBroadcaster::default(),
        settings: Arc::new(HandlerSettings {
            grpcurl_path: Some("/nonexistent/bin/grpcurl".into()),
            ..Default::default()
        }),
    };
    let mut handler = GrpcHandler::new(ctx);
    let err = handler.connect().await.unwrap_err();
    assert!(err.to_string().contains("grpcurl not found"), "{err}");
}
