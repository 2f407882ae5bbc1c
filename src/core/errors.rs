// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure the core can surface.
///
/// Structural failures (unknown protocol, inactive connection, bad params) carry a
/// fixed machine code. Transport failures are passed through the error classifier
/// to obtain a protocol-family specific code and hint.
#[derive(Error, Debug)]
pub enum UniconError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Unsupported protocol type '{0}'")]
    UnsupportedProtocol(String),

    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    #[error("Connection '{0}' is not active")]
    NotActive(String),

    #[error("{0} not connected")]
    NotConnected(String),

    #[error("Unknown operation '{operation}' for protocol '{protocol}'")]
    UnknownOperation { protocol: String, operation: String },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Field '{0}' cannot be changed after creation")]
    ImmutableField(String),

    #[error("TypeMismatch: {0}")]
    TypeMismatch(String),

    #[error("{0}")]
    ShapeMismatch(String),

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote side answered, but with a failure status.
    #[error("{message}")]
    Remote {
        message: String,
        detail: serde_json::Value,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UniconError {
    /// Returns the fixed machine code for structural errors, or `None` when the
    /// error must be classified against its protocol family.
    pub fn fixed_code(&self) -> Option<&'static str> {
        match self {
            UniconError::UnsupportedProtocol(_) => Some("UNSUPPORTED_PROTOCOL"),
            UniconError::ConnectionNotFound(_) => Some("CONNECTION_NOT_FOUND"),
            UniconError::NotActive(_) => Some("NOT_ACTIVE"),
            UniconError::NotConnected(_) => Some("NOT_CONNECTED"),
            UniconError::UnknownOperation { .. } => Some("UNKNOWN_OPERATION"),
            UniconError::InvalidParams(_) => Some("INVALID_PARAMS"),
            UniconError::InvalidConfig(_) => Some("INVALID_CONFIG"),
            UniconError::ImmutableField(_) => Some("IMMUTABLE_FIELD"),
            UniconError::TypeMismatch(_) => Some("TYPE_MISMATCH"),
            UniconError::ShapeMismatch(_) => Some("SHAPE_MISMATCH"),
            UniconError::SessionNotFound(_) => Some("SESSION_NOT_FOUND"),
            UniconError::Unsupported(_) => Some("UNSUPPORTED"),
            UniconError::Storage(_) => Some("STORAGE_ERROR"),
            UniconError::Internal(_) => Some("INTERNAL_ERROR"),
            UniconError::Io(_)
            | UniconError::Timeout(_)
            | UniconError::Transport(_)
            | UniconError::Protocol(_)
            | UniconError::Remote { .. } => None,
        }
    }

    /// Hint text for structural errors.
    pub fn fixed_hint(&self) -> Option<&'static str> {
        let hint = match self {
            UniconError::UnsupportedProtocol(_) => {
                "Pick one of the registered protocol types for this connection."
            }
            UniconError::ConnectionNotFound(_) => "Refresh the connection list; it may have been deleted.",
            UniconError::NotActive(_) => "Connect the connection before invoking operations.",
            UniconError::NotConnected(_) => "The handler has no live transport; reconnect first.",
            UniconError::UnknownOperation { .. } => {
                "Check the operation name against the protocol's supported operations."
            }
            UniconError::InvalidParams(_) => "Check the operation parameters.",
            UniconError::InvalidConfig(_) => "Edit the connection configuration and try again.",
            UniconError::ImmutableField(_) => {
                "Delete and recreate the connection to change its protocol type."
            }
            UniconError::TypeMismatch(_) => {
                "The value could not be converted to the variable's data type."
            }
            UniconError::ShapeMismatch(_) => {
                "The value's scalar/array shape does not match the variable's declaration."
            }
            UniconError::SessionNotFound(_) => "The session has already been closed.",
            UniconError::Unsupported(_) => "This capability is not available for this connection.",
            UniconError::Storage(_) => "Check the connection store path and permissions.",
            UniconError::Internal(_) => "Unexpected internal failure; see server logs.",
            _ => return None,
        };
        Some(hint)
    }

    /// Extra structured detail attached to the error, if any.
    pub fn detail(&self) -> Option<&serde_json::Value> {
        match self {
            UniconError::Remote { detail, .. } if !detail.is_null() => Some(detail),
            _ => None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        UniconError::Transport(message.into())
    }

    pub fn params(message: impl Into<String>) -> Self {
        UniconError::InvalidParams(message.into())
    }
}

/// Manual implementation of `Clone` because `std::io::Error` does not implement it.
impl Clone for UniconError {
    fn clone(&self) -> Self {
        match self {
            UniconError::Io(e) => UniconError::Io(Arc::clone(e)),
            UniconError::UnsupportedProtocol(s) => UniconError::UnsupportedProtocol(s.clone()),
            UniconError::ConnectionNotFound(s) => UniconError::ConnectionNotFound(s.clone()),
            UniconError::NotActive(s) => UniconError::NotActive(s.clone()),
            UniconError::NotConnected(s) => UniconError::NotConnected(s.clone()),
            UniconError::UnknownOperation {
                protocol,
                operation,
            } => UniconError::UnknownOperation {
                protocol: protocol.clone(),
                operation: operation.clone(),
            },
            UniconError::InvalidParams(s) => UniconError::InvalidParams(s.clone()),
            UniconError::InvalidConfig(s) => UniconError::InvalidConfig(s.clone()),
            UniconError::ImmutableField(s) => UniconError::ImmutableField(s.clone()),
            UniconError::TypeMismatch(s) => UniconError::TypeMismatch(s.clone()),
            UniconError::ShapeMismatch(s) => UniconError::ShapeMismatch(s.clone()),
            UniconError::SessionNotFound(s) => UniconError::SessionNotFound(s.clone()),
            UniconError::Timeout(s) => UniconError::Timeout(s.clone()),
            UniconError::Transport(s) => UniconError::Transport(s.clone()),
            UniconError::Protocol(s) => UniconError::Protocol(s.clone()),
            UniconError::Remote { message, detail } => UniconError::Remote {
                message: message.clone(),
                detail: detail.clone(),
            },
            UniconError::Unsupported(s) => UniconError::Unsupported(s.clone()),
            UniconError::Storage(s) => UniconError::Storage(s.clone()),
            UniconError::Internal(s) => UniconError::Internal(s.clone()),
        }
    }
}

/// Manual `PartialEq` so tests can compare errors; I/O errors compare by message.
impl PartialEq for UniconError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (UniconError::Io(a), UniconError::Io(b)) => a.to_string() == b.to_string(),
            (
                UniconError::UnknownOperation {
                    protocol: p1,
                    operation: o1,
                },
                UniconError::UnknownOperation {
                    protocol: p2,
                    operation: o2,
                },
            ) => p1 == p2 && o1 == o2,
            (
                UniconError::Remote {
                    message: m1,
                    detail: d1,
                },
                UniconError::Remote {
                    message: m2,
                    detail: d2,
                },
            ) => m1 == m2 && d1 == d2,
            _ => {
                std::mem::discriminant(self) == std::mem::discriminant(other)
                    && self.to_string() == other.to_string()
            }
        }
    }
}

impl From<std::io::Error> for UniconError {
    fn from(e: std::io::Error) -> Self {
        UniconError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for UniconError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return UniconError::Timeout(e.to_string());
        }
        // reqwest hides the root cause behind "error sending request"; walk the chain.
        let mut message = e.to_string();
        let mut source = std::error::Error::source(&e);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        UniconError::Transport(message)
    }
}

impl From<serde_json::Error> for UniconError {
    fn from(e: serde_json::Error) -> Self {
        UniconError::InvalidParams(e.to_string())
    }
}

impl From<rusqlite::Error> for UniconError {
    fn from(e: rusqlite::Error) -> Self {
        UniconError::Transport(format!("SQLITE: {e}"))
    }
}

impl From<sqlx::Error> for UniconError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut => {
                UniconError::Timeout("timed out acquiring a database connection".to_string())
            }
            sqlx::Error::Database(db) => match db.code() {
                Some(code) => UniconError::Transport(format!("SQL {code}: {}", db.message())),
                None => UniconError::Transport(format!("SQL: {}", db.message())),
            },
            other => UniconError::Transport(format!("SQL: {other}")),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for UniconError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        UniconError::Transport(e.to_string())
    }
}

impl From<russh::Error> for UniconError {
    fn from(e: russh::Error) -> Self {
        UniconError::Transport(format!("SSH: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for UniconError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        UniconError::Timeout("deadline elapsed".to_string())
    }
}

impl From<base64::DecodeError> for UniconError {
    fn from(e: base64::DecodeError) -> Self {
        UniconError::InvalidParams(format!("invalid base64 payload: {e}"))
    }
}
