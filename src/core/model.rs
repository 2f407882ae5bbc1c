// src/core/model.rs

//! Durable connection records and the tags that select a protocol handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// The protocol tag stored on a connection. Parsing is case-insensitive and
/// accepts the historical aliases (`opc-ua`, `kubernetes`, `ws`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum ProtocolType {
    #[strum(to_string = "opcua", serialize = "opc-ua")]
    OpcUa,
    #[strum(serialize = "grpc")]
    Grpc,
    #[strum(serialize = "ssh")]
    Ssh,
    #[strum(serialize = "sftp")]
    Sftp,
    #[strum(serialize = "ftp")]
    Ftp,
    #[strum(serialize = "sql")]
    Sql,
    #[strum(to_string = "websocket", serialize = "ws")]
    WebSocket,
    #[strum(to_string = "k8s", serialize = "kubernetes")]
    Kubernetes,
    #[strum(serialize = "soap")]
    Soap,
    #[strum(serialize = "rest")]
    Rest,
    #[strum(serialize = "snmp")]
    Snmp,
    #[strum(to_string = "ntcip-ess", serialize = "ntcip_ess")]
    NtcipEss,
    #[strum(to_string = "ntcip-vms", serialize = "ntcip_vms")]
    NtcipVms,
    #[strum(serialize = "localfs")]
    LocalFs,
}

impl ProtocolType {
    /// The error-classification family this protocol belongs to.
    pub fn family(self) -> ProtocolFamily {
        match self {
            ProtocolType::OpcUa => ProtocolFamily::OpcUa,
            ProtocolType::Snmp | ProtocolType::NtcipEss | ProtocolType::NtcipVms => {
                ProtocolFamily::Snmp
            }
            ProtocolType::Rest | ProtocolType::Soap => ProtocolFamily::Http,
            ProtocolType::Ssh | ProtocolType::Sftp => ProtocolFamily::Ssh,
            ProtocolType::Ftp => ProtocolFamily::Ftp,
            ProtocolType::Sql => ProtocolFamily::Sql,
            ProtocolType::WebSocket => ProtocolFamily::WebSocket,
            ProtocolType::Kubernetes => ProtocolFamily::Kubernetes,
            ProtocolType::Grpc => ProtocolFamily::Grpc,
            ProtocolType::LocalFs => ProtocolFamily::LocalFs,
        }
    }
}

/// Groups protocols that fail in the same ways, so error classification rules
/// can be shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProtocolFamily {
    OpcUa,
    Snmp,
    Http,
    Ssh,
    Ftp,
    Sql,
    WebSocket,
    #[strum(serialize = "k8s")]
    Kubernetes,
    Grpc,
    LocalFs,
    Unknown,
}

impl ProtocolFamily {
    /// Resolves a family from a raw protocol tag. Never fails; unrecognized tags
    /// map to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        tag.parse::<ProtocolType>()
            .map(ProtocolType::family)
            .unwrap_or(ProtocolFamily::Unknown)
    }
}

/// Persisted connection status. `connecting` exists only in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

/// A durable connection definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub name: String,
    /// Opaque tag; parsed into `ProtocolType` only when connecting.
    #[serde(rename = "type", alias = "protocolType")]
    pub protocol_type: String,
    /// Protocol-specific configuration. Never interpreted outside the handler.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

impl Connection {
    /// Builds a new, disconnected connection with a generated id.
    pub fn new(
        name: impl Into<String>,
        protocol_type: impl Into<String>,
        config: serde_json::Value,
        workspace_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            protocol_type: protocol_type.into(),
            config,
            status: ConnectionStatus::Disconnected,
            created_at: now,
            updated_at: now,
            workspace_id,
        }
    }
}

/// Fields accepted by a connection edit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub config: Option<serde_json::Value>,
    #[serde(alias = "type")]
    pub protocol_type: Option<String>,
    pub workspace_id: Option<String>,
}
