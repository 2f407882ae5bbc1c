// src/core/protocol/jsonl.rs

//! Newline-delimited JSON frames for the front door, with the matching
//! `Encoder` and `Decoder`.

use crate::core::errors::UniconError;
use crate::core::events::Event;
use crate::core::router::OperationResponse;
use bytes::{Buf, BufMut, BytesMut};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

/// Longest accepted request line; uploads travel base64-encoded inside it.
const MAX_LINE_LENGTH: usize = 64 * 1024 * 1024;

/// `{id, method, params}` sent by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RequestFrame {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// What the decoder yields for one line.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Request(RequestFrame),
    /// A line that was not a valid request. The connection stays open.
    Malformed { id: Value, reason: String },
}

/// Frames written back to a client.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Response { id: Value, body: OperationResponse },
    Event(Arc<Event>),
}

impl OutboundFrame {
    pub fn to_json(&self) -> Value {
        match self {
            OutboundFrame::Response { id, body } => {
                let mut map = Map::new();
                map.insert("id".into(), id.clone());
                if let Ok(Value::Object(fields)) = serde_json::to_value(body) {
                    map.extend(fields);
                }
                Value::Object(map)
            }
            OutboundFrame::Event(event) => json!({ "event": event.to_json() }),
        }
    }
}

#[derive(Debug, Default)]
pub struct JsonLineCodec {
    /// How far the buffer has already been scanned for a newline.
    scanned: usize,
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder<OutboundFrame> for JsonLineCodec {
    type Error = UniconError;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_vec(&item.to_json())
            .map_err(|e| UniconError::Internal(format!("frame serialization failed: {e}")))?;
        dst.reserve(line.len() + 1);
        dst.put_slice(&line);
        dst.put_u8(b'\n');
        Ok(())
    }
}

impl Decoder for JsonLineCodec {
    type Item = InboundFrame;
    type Error = UniconError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = src.len();
                if src.len() > MAX_LINE_LENGTH {
                    return Err(UniconError::Protocol(format!(
                        "request line exceeds {MAX_LINE_LENGTH} bytes"
                    )));
                }
                return Ok(None);
            };
            let end = self.scanned + offset;
            self.scanned = 0;
            let line = src.split_to(end);
            src.advance(1);
            let mut bytes = &line[..];
            if let Some(stripped) = bytes.strip_suffix(b"\r") {
                bytes = stripped;
            }
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(parse_line(bytes)));
        }
    }
}

fn parse_line(bytes: &[u8]) -> InboundFrame {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            return InboundFrame::Malformed {
                id: Value::Null,
                reason: format!("invalid JSON: {e}"),
            };
        }
    };
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    match serde_json::from_value::<RequestFrame>(value) {
        Ok(request) => InboundFrame::Request(request),
        Err(e) => InboundFrame::Malformed {
            id,
            reason: format!("invalid request: {e}"),
        },
    }
}

/// One item of a concatenated-JSON stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentFrame {
    Document(Value),
    /// A line that did not start a JSON document, passed through as text.
    Text(String),
}

/// Splits a byte stream of back-to-back JSON documents (pretty-printed or
/// not) into values. Garbage up to the next newline is surfaced as text.
#[derive(Debug, Default)]
pub struct JsonDocumentCodec;

impl Decoder for JsonDocumentCodec {
    type Item = DocumentFrame;
    type Error = UniconError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let skip = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        src.advance(skip);
        if src.is_empty() {
            return Ok(None);
        }
        let mut stream = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                src.advance(consumed);
                Ok(Some(DocumentFrame::Document(value)))
            }
            Some(Err(e)) if e.is_eof() => {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(UniconError::Protocol(format!(
                        "JSON document exceeds {MAX_LINE_LENGTH} bytes"
                    )));
                }
                Ok(None)
            }
            Some(Err(_)) => match src.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    let line = src.split_to(end);
                    src.advance(1);
                    Ok(Some(DocumentFrame::Text(
                        String::from_utf8_lossy(&line).trim_end().to_string(),
                    )))
                }
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(DocumentFrame::Text(
            String::from_utf8_lossy(&rest).trim().to_string(),
        )))
    }
}
