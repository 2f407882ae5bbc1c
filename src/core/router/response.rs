// src/core/router/response.rs

//! The inbound operation contract and its response envelope.

use crate::core::classifier::classify_error;
use crate::core::errors::UniconError;
use crate::core::model::{ConnectionStatus, ProtocolFamily};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{connectionId, operation, params}` plus an optional caller deadline.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub connection_id: String,
    pub operation: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl OperationRequest {
    pub fn new(connection_id: impl Into<String>, operation: impl Into<String>, params: Value) -> Self {
        Self {
            connection_id: connection_id.into(),
            operation: operation.into(),
            params,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// `{success, data?, error?, code?, hint?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl OperationResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            hint: None,
        }
    }

    /// Builds a failure envelope. Every failure carries a code and a hint.
    pub fn failure(family: ProtocolFamily, error: &UniconError) -> Self {
        let classification = classify_error(family, error);
        Self {
            success: false,
            data: error.detail().cloned(),
            error: Some(error.to_string()),
            code: Some(classification.code),
            hint: Some(classification.hint),
        }
    }

    pub fn from_result(family: ProtocolFamily, result: Result<Value, UniconError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::failure(family, &e),
        }
    }
}

/// Result of a `connect` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOutcome {
    pub connection_id: String,
    pub status: ConnectionStatus,
    /// True when the connection was already live and nothing was done.
    pub already_connected: bool,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

/// Result of a `disconnect` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectOutcome {
    pub connection_id: String,
    pub status: ConnectionStatus,
    /// False when there was no live connection to tear down.
    pub was_active: bool,
}
