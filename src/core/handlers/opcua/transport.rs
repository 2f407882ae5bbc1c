// src/core/handlers/opcua/transport.rs

//! The seam between the OPC UA handler and the client session, so the write
//! pipeline and monitors can run against an in-memory server in tests.

use crate::core::errors::UniconError;
use async_trait::async_trait;
use opcua::client::{ClientBuilder, IdentityToken, Session};
use opcua::crypto::SecurityPolicy;
use opcua::types::{
    BrowseDescription, BrowseDirection, ByteString, DataValue, MessageSecurityMode, NodeId,
    ReadValueId, ReferenceDescription, ReferenceTypeId, StatusCode, TimestampsToReturn,
    UserTokenPolicy, WriteValue,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on BrowseNext round trips for one node.
const MAX_BROWSE_PAGES: usize = 100;
/// All ReferenceDescription fields.
const BROWSE_RESULT_MASK_ALL: u32 = 0x3f;
const SESSION_TIMEOUT_MS: f64 = 60_000.0;

/// A validated `opc.tcp://host:port[/path]` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UaEndpoint {
    pub url: String,
    pub host: String,
    pub port: u16,
}

impl UaEndpoint {
    /// Validates and normalizes an endpoint URL.
    pub fn parse(raw: &str) -> Result<Self, UniconError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(UniconError::InvalidConfig(
                "OPC UA endpointUrl is required".into(),
            ));
        }
        let invalid = || {
            UniconError::InvalidConfig(
                "Invalid OPC UA endpointUrl. Expected format: opc.tcp://host:port".into(),
            )
        };
        if !raw.to_ascii_lowercase().starts_with("opc.tcp://") {
            return Err(invalid());
        }
        let rest = &raw["opc.tcp://".len()..];
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty()
            || port.is_empty()
            || port.len() > 5
            || !port.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let port: u32 = port.parse().map_err(|_| invalid())?;
        let port = u16::try_from(port).map_err(|_| {
            UniconError::InvalidConfig("Invalid OPC UA port: must be 0-65535".into())
        })?;
        Ok(Self {
            url: format!("opc.tcp://{host}:{port}{path}"),
            host: host.to_string(),
            port,
        })
    }
}

/// Turns a bad service result into the error surfaced to callers.
pub fn status_error(status: StatusCode, context: &str) -> UniconError {
    UniconError::Remote {
        message: if context.is_empty() {
            status.sub_code().name().to_string()
        } else {
            format!("{}: {context}", status.sub_code().name())
        },
        detail: json!({ "statusCode": status.sub_code().name(), "code": status.bits() }),
    }
}

/// The services the handler uses on an activated session.
#[async_trait]
pub trait UaTransport: Send + Sync {
    async fn read(&self, nodes: &[ReadValueId]) -> Result<Vec<DataValue>, UniconError>;
    async fn write(&self, values: &[WriteValue]) -> Result<Vec<StatusCode>, UniconError>;
    async fn browse(&self, node: &NodeId) -> Result<Vec<ReferenceDescription>, UniconError>;
    async fn close(&self) -> Result<(), UniconError>;
}

/// Opens sessions.
#[async_trait]
pub trait UaConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: UaEndpoint,
        timeout: Duration,
    ) -> Result<Arc<dyn UaTransport>, UniconError>;
}

/// Connects with the `opcua` client over SecurityPolicy None and an
/// anonymous identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientConnector;

#[async_trait]
impl UaConnector for ClientConnector {
    async fn connect(
        &self,
        endpoint: UaEndpoint,
        timeout: Duration,
    ) -> Result<Arc<dyn UaTransport>, UniconError> {
        let session = UaSession::open(endpoint, timeout).await?;
        Ok(Arc::new(session))
    }
}

/// A live client session and the event loop that drives it.
pub struct UaSession {
    endpoint: UaEndpoint,
    session: Arc<Session>,
    event_loop: Mutex<Option<JoinHandle<StatusCode>>>,
    timeout: Duration,
}

impl UaSession {
    pub async fn open(endpoint: UaEndpoint, timeout: Duration) -> Result<Self, UniconError> {
        let mut client = ClientBuilder::new()
            .application_name("Unicon")
            .application_uri("urn:unicon:client")
            .product_uri("urn:unicon")
            .pki_dir(std::env::temp_dir().join("unicon-pki"))
            .create_sample_keypair(false)
            .trust_server_certs(true)
            .session_retry_limit(0)
            .session_timeout(SESSION_TIMEOUT_MS as u32)
            .client()
            .map_err(|errors| {
                UniconError::InvalidConfig(format!(
                    "OPC UA client configuration rejected: {}",
                    errors.join("; ")
                ))
            })?;

        let (session, event_loop) = client
            .connect_to_matching_endpoint(
                (
                    endpoint.url.as_str(),
                    SecurityPolicy::None.to_str(),
                    MessageSecurityMode::None,
                    UserTokenPolicy::anonymous(),
                ),
                IdentityToken::Anonymous,
            )
            .await
            .map_err(|status| {
                status_error(status, &format!("cannot open a session on {}", endpoint.url))
            })?;
        let handle = event_loop.spawn();

        if !session.wait_for_connection().await {
            handle.abort();
            return Err(UniconError::transport(format!(
                "BadCommunicationError: session on {} ended before it was activated",
                endpoint.url
            )));
        }
        info!("OPC UA session activated on {}", endpoint.url);
        Ok(Self {
            endpoint,
            session,
            event_loop: Mutex::new(Some(handle)),
            timeout,
        })
    }

    fn ensure_open(&self) -> Result<(), UniconError> {
        if self.event_loop.lock().is_some() {
            Ok(())
        } else {
            Err(UniconError::NotConnected("OPC UA session".into()))
        }
    }

    /// Applies the request timeout and maps a bad service result.
    async fn call<T>(
        &self,
        service: &str,
        request: impl Future<Output = Result<T, StatusCode>>,
    ) -> Result<T, UniconError> {
        self.ensure_open()?;
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                UniconError::Timeout(format!(
                    "BadTimeout: {service} got no response within {} ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|status| status_error(status, service))
    }
}

#[async_trait]
impl UaTransport for UaSession {
    async fn read(&self, nodes: &[ReadValueId]) -> Result<Vec<DataValue>, UniconError> {
        self.call(
            "Read",
            self.session.read(nodes, TimestampsToReturn::Both, 0.0),
        )
        .await
    }

    async fn write(&self, values: &[WriteValue]) -> Result<Vec<StatusCode>, UniconError> {
        self.call("Write", self.session.write(values)).await
    }

    /// Forward hierarchical references of `node`, following continuation points.
    async fn browse(&self, node: &NodeId) -> Result<Vec<ReferenceDescription>, UniconError> {
        let description = BrowseDescription {
            node_id: node.clone(),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BROWSE_RESULT_MASK_ALL,
        };
        let mut results = self
            .call("Browse", self.session.browse(&[description], 0, None))
            .await?;
        let mut references = Vec::new();
        for _ in 0..MAX_BROWSE_PAGES {
            let Some(page) = results.pop() else {
                break;
            };
            if page.status_code.is_bad() {
                return Err(status_error(page.status_code, &format!("Browse {node}")));
            }
            references.extend(page.references.unwrap_or_default());
            let point: ByteString = page.continuation_point;
            if point.value.as_ref().is_none_or(|bytes| bytes.is_empty()) {
                break;
            }
            results = self
                .call("BrowseNext", self.session.browse_next(false, &[point]))
                .await?;
        }
        Ok(references)
    }

    /// Closes the session and stops its event loop. Safe to call twice.
    async fn close(&self) -> Result<(), UniconError> {
        let Some(handle) = self.event_loop.lock().take() else {
            return Ok(());
        };
        let result = match tokio::time::timeout(self.timeout, self.session.disconnect()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(status)) => Err(status_error(status, "CloseSession")),
            Err(_) => Err(UniconError::Timeout("BadTimeout: CloseSession".into())),
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(Duration::from_secs(2), handle).await {
            Ok(Ok(status)) => {
                debug!("OPC UA event loop for {} ended: {}", self.endpoint.url, status)
            }
            Ok(Err(e)) => warn!("OPC UA event loop for {} failed: {}", self.endpoint.url, e),
            Err(_) => abort.abort(),
        }
        result
    }
}

impl Drop for UaSession {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.get_mut().take() {
            handle.abort();
        }
    }
}
