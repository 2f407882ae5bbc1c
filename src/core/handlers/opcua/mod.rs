// src/core/handlers/opcua/mod.rs

//! OPC UA handler: browse, read, typed writes and polling monitors.

pub mod coercion;
pub mod transport;
pub mod types;

pub use coercion::NodeMeta;
pub use transport::{ClientConnector, UaConnector, UaEndpoint, UaTransport};
pub use types::DataType;

use super::{HandlerContext, ProtocolHandler, params};
use crate::core::errors::UniconError;
use crate::core::session::{SessionRegistry, SessionResource};
use async_trait::async_trait;
use chrono::Utc;
use lru::LruCache;
use opcua::types::{
    AttributeId, DataValue, NodeId, NumericRange, ReadValueId, StatusCode, WriteValue,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const OPERATIONS: &[&str] = &[
    "browse",
    "read",
    "readMeta",
    "write",
    "monitorStart",
    "monitorStop",
    "listSessions",
];

const META_CACHE_CAPACITY: usize = 1024;
const MIN_SAMPLING_MS: u64 = 50;
const CSV_HEADER: &str = "timestamp,nodeId,value,status\n";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpcUaConfig {
    #[serde(default)]
    endpoint_url: String,
    #[serde(default = "default_security")]
    security_mode: String,
    #[serde(default = "default_security")]
    security_policy: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_security() -> String {
    "None".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn is_none_security(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("none") || v.ends_with("#None")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrowseParams {
    #[serde(default = "default_browse_root")]
    node_id: String,
}

fn default_browse_root() -> String {
    "ns=0;i=85".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadParams {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    node_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeParams {
    node_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteParams {
    node_id: String,
    value: Value,
    #[serde(default)]
    data_type: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonitorParams {
    node_ids: params::OneOrMany,
    #[serde(default = "default_sampling")]
    sampling_interval: u64,
    #[serde(default)]
    log_path: Option<PathBuf>,
}

fn default_sampling() -> u64 {
    1000
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopParams {
    #[serde(alias = "monitorId")]
    session_id: String,
}

fn parse_node(raw: &str) -> Result<NodeId, UniconError> {
    NodeId::from_str(raw.trim())
        .map_err(|_| UniconError::params(format!("invalid nodeId '{raw}'")))
}

fn attribute_read(node: &NodeId, attribute: AttributeId) -> ReadValueId {
    ReadValueId {
        attribute_id: attribute as u32,
        ..ReadValueId::new_value(node.clone())
    }
}

/// Variable metadata by node id, resolved once per session.
pub type MetaCache = LruCache<NodeId, NodeMeta>;

pub fn new_meta_cache() -> MetaCache {
    LruCache::new(NonZeroUsize::new(META_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN))
}

/// Reads (or returns the cached) DataType/ValueRank/ArrayDimensions of a node.
pub async fn resolve_meta(
    transport: &dyn UaTransport,
    cache: &mut MetaCache,
    node: &NodeId,
) -> Result<NodeMeta, UniconError> {
    if let Some(meta) = cache.get(node) {
        return Ok(meta.clone());
    }
    let reads = [
        attribute_read(node, AttributeId::DataType),
        attribute_read(node, AttributeId::ValueRank),
        attribute_read(node, AttributeId::ArrayDimensions),
    ];
    let values = transport.read(&reads).await?;
    if let Some(first) = values.first()
        && first.status == Some(StatusCode::BadNodeIdUnknown)
    {
        return Err(UniconError::Remote {
            message: format!("BadNodeIdUnknown: {node}"),
            detail: json!({ "nodeId": node.to_string(), "statusCode": types::status_of(first).sub_code().name() }),
        });
    }
    let meta = NodeMeta::from_attributes(&values);
    debug!("Resolved metadata for {}: {:?}", node, meta);
    cache.put(node.clone(), meta.clone());
    Ok(meta)
}

/// Shape check, coercion and write, falling back to one write per element
/// when the server refuses a whole-array write.
pub async fn write_value(
    transport: &dyn UaTransport,
    cache: &mut MetaCache,
    node: &NodeId,
    value: &Value,
    explicit_type: &Value,
) -> Result<Value, UniconError> {
    let meta = resolve_meta(transport, cache, node).await?;
    coercion::validate_shape(value, &meta)?;

    let target = coercion::parse_data_type(explicit_type)?.or(meta.data_type);
    let variant = coercion::coerce_variant(value, target)?;
    let statuses = transport
        .write(&[WriteValue::value_attr(node.clone(), variant)])
        .await?;
    let status = statuses
        .first()
        .copied()
        .unwrap_or(StatusCode::BadUnexpectedError);
    if status.is_good() {
        return Ok(json!({ "nodeId": node.to_string(), "statusCode": status.sub_code().name() }));
    }

    let Some(items) = value.as_array() else {
        return Err(write_failed(node, status));
    };
    debug!(
        "Whole-array write to {} returned {}; retrying element-wise",
        node, status
    );
    let element_type = target.unwrap_or_else(|| coercion::infer_element_type(items));
    let writes = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            Ok(WriteValue {
                index_range: NumericRange::Index(i as u32),
                ..WriteValue::value_attr(node.clone(), coercion::coerce_scalar(item, element_type)?)
            })
        })
        .collect::<Result<Vec<_>, UniconError>>()?;
    let element_statuses = transport.write(&writes).await?;
    let names: Vec<&str> = element_statuses.iter().map(|s| s.sub_code().name()).collect();
    let all_good =
        element_statuses.len() == writes.len() && element_statuses.iter().all(|s| s.is_good());
    if all_good {
        Ok(json!({
            "nodeId": node.to_string(),
            "statusCode": status.sub_code().name(),
            "fallback": "elementwise",
            "statusCodes": names,
        }))
    } else {
        Err(UniconError::Remote {
            message: format!("Element-wise write to {node} failed"),
            detail: json!({
                "nodeId": node.to_string(),
                "statusCode": status.sub_code().name(),
                "statusCodes": names,
            }),
        })
    }
}

fn write_failed(node: &NodeId, status: StatusCode) -> UniconError {
    UniconError::Remote {
        message: format!("{}: write to {} rejected", status.sub_code().name(), node),
        detail: json!({ "nodeId": node.to_string(), "statusCode": status.sub_code().name() }),
    }
}

fn read_row(node: &str, dv: &DataValue) -> Value {
    let mut row = types::data_value_to_json(dv);
    if let Value::Object(map) = &mut row {
        map.insert("nodeId".into(), json!(node));
    }
    row
}

/// A polling subscription over a set of nodes.
pub struct MonitorSession {
    node_ids: Vec<String>,
    log_path: Option<PathBuf>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl SessionResource for MonitorSession {
    fn kind(&self) -> &'static str {
        "monitor"
    }

    async fn terminate(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                abort.abort();
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    fn describe(&self) -> Value {
        json!({ "nodeIds": self.node_ids, "logPath": self.log_path })
    }
}

struct PollTarget {
    label: String,
    node: NodeId,
}

async fn open_csv(path: &PathBuf) -> Result<tokio::fs::File, UniconError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    if file.metadata().await?.len() == 0 {
        file.write_all(CSV_HEADER.as_bytes()).await?;
    }
    Ok(file)
}

fn csv_line(ts: &str, node: &str, value: &Value, status: &str) -> String {
    let quote = |s: &str| Value::String(s.to_string()).to_string();
    format!("{ts},{},{},{}\n", quote(node), value, quote(status))
}

async fn poll_loop(
    transport: Arc<dyn UaTransport>,
    targets: Vec<PollTarget>,
    every: Duration,
    mut csv: Option<tokio::fs::File>,
    mut stop: oneshot::Receiver<()>,
    ctx: HandlerContext,
    session_id: String,
) {
    let reads: Vec<ReadValueId> = targets
        .iter()
        .map(|t| ReadValueId::new_value(t.node.clone()))
        .collect();
    let mut last: HashMap<String, (Value, String)> = HashMap::new();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }
        let values = match transport.read(&reads).await {
            Ok(values) => values,
            Err(e) => {
                warn!("Monitor {} read failed: {}", session_id, e);
                ctx.emit_session(
                    "opcua",
                    &session_id,
                    json!({ "event": "error", "error": e.to_string() }),
                );
                if matches!(e, UniconError::NotConnected(_)) {
                    break;
                }
                continue;
            }
        };
        for (target, dv) in targets.iter().zip(values) {
            let value = dv
                .value
                .as_ref()
                .map(types::variant_to_json)
                .unwrap_or(Value::Null);
            let status = types::status_of(&dv).sub_code().name().to_string();
            let changed = last
                .get(&target.label)
                .is_none_or(|(v, s)| *v != value || *s != status);
            if !changed {
                continue;
            }
            let ts = Utc::now().to_rfc3339();
            if let Some(file) = csv.as_mut()
                && let Err(e) = file
                    .write_all(csv_line(&ts, &target.label, &value, &status).as_bytes())
                    .await
            {
                warn!("Monitor {} could not append to its log: {}", session_id, e);
                csv = None;
            }
            ctx.emit_session(
                "opcua",
                &session_id,
                json!({
                    "event": "data",
                    "nodeId": target.label,
                    "value": value,
                    "status": status,
                    "ts": ts,
                }),
            );
            last.insert(target.label.clone(), (value, status));
        }
    }
    if let Some(mut file) = csv {
        let _ = file.flush().await;
    }
    debug!("Monitor {} stopped", session_id);
}

pub struct OpcUaHandler {
    ctx: HandlerContext,
    connector: Arc<dyn UaConnector>,
    transport: Option<Arc<dyn UaTransport>>,
    meta: MetaCache,
    monitors: SessionRegistry<MonitorSession>,
}

impl OpcUaHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self::with_connector(ctx, Arc::new(ClientConnector))
    }

    /// A handler that opens its sessions through `connector`.
    pub fn with_connector(ctx: HandlerContext, connector: Arc<dyn UaConnector>) -> Self {
        Self {
            ctx,
            connector,
            transport: None,
            meta: new_meta_cache(),
            monitors: SessionRegistry::new(),
        }
    }

    fn transport(&self) -> Result<Arc<dyn UaTransport>, UniconError> {
        self.transport
            .clone()
            .ok_or_else(|| UniconError::NotConnected("OPC UA".into()))
    }

    async fn browse(&self, params: Value) -> Result<Value, UniconError> {
        let p: BrowseParams = params::parse("browse", params)?;
        let node = parse_node(&p.node_id)?;
        let references = self.transport()?.browse(&node).await?;
        Ok(json!({
            "nodeId": node.to_string(),
            "references": references.iter().map(types::reference_to_json).collect::<Vec<_>>(),
        }))
    }

    async fn read(&self, params: Value) -> Result<Value, UniconError> {
        let p: ReadParams = params::parse("read", params)?;
        let (labels, single) = match (p.node_ids, p.node_id) {
            (Some(ids), _) if !ids.is_empty() => (ids, false),
            (_, Some(id)) => (vec![id], true),
            _ => return Err(UniconError::params("read: nodeId or nodeIds is required")),
        };
        let reads = labels
            .iter()
            .map(|l| parse_node(l).map(ReadValueId::new_value))
            .collect::<Result<Vec<_>, _>>()?;
        let values = self.transport()?.read(&reads).await?;
        let rows: Vec<Value> = labels
            .iter()
            .zip(values.iter())
            .map(|(label, dv)| read_row(label, dv))
            .collect();
        Ok(if single {
            rows.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(rows)
        })
    }

    async fn read_meta(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: NodeParams = params::parse("readMeta", params)?;
        let node = parse_node(&p.node_id)?;
        let transport = self.transport()?;
        self.meta.pop(&node);
        let meta = resolve_meta(transport.as_ref(), &mut self.meta, &node).await?;
        let mut out = meta.to_json();
        if let Value::Object(map) = &mut out {
            map.insert("nodeId".into(), json!(node.to_string()));
        }
        Ok(out)
    }

    async fn write(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: WriteParams = params::parse("write", params)?;
        let node = parse_node(&p.node_id)?;
        let transport = self.transport()?;
        write_value(transport.as_ref(), &mut self.meta, &node, &p.value, &p.data_type).await
    }

    async fn monitor_start(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: MonitorParams = params::parse("monitorStart", params)?;
        let labels: Vec<String> = p
            .node_ids
            .into_vec()
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if labels.is_empty() {
            return Err(UniconError::params("monitorStart: nodeIds required"));
        }
        let targets = labels
            .iter()
            .map(|label| {
                Ok(PollTarget {
                    label: label.clone(),
                    node: parse_node(label)?,
                })
            })
            .collect::<Result<Vec<_>, UniconError>>()?;
        let transport = self.transport()?;
        let csv = match &p.log_path {
            Some(path) => Some(open_csv(path).await?),
            None => None,
        };

        let session_id = SessionRegistry::<MonitorSession>::next_id();
        let (stop_tx, stop_rx) = oneshot::channel();
        let every = Duration::from_millis(p.sampling_interval.max(MIN_SAMPLING_MS));
        let task = tokio::spawn(poll_loop(
            transport,
            targets,
            every,
            csv,
            stop_rx,
            self.ctx.clone(),
            session_id.clone(),
        ));
        info!(
            "OPC UA monitor {} started on {} node(s)",
            session_id,
            labels.len()
        );
        self.monitors.insert(
            session_id.clone(),
            MonitorSession {
                node_ids: labels,
                log_path: p.log_path.clone(),
                stop: Some(stop_tx),
                task: Some(task),
            },
        );
        Ok(json!({ "sessionId": session_id, "logPath": p.log_path }))
    }

    async fn monitor_stop(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: StopParams = params::parse("monitorStop", params)?;
        let stopped = self.monitors.remove(&p.session_id).await;
        Ok(json!({ "stopped": stopped }))
    }
}

#[async_trait]
impl ProtocolHandler for OpcUaHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: OpcUaConfig = self.ctx.parse_config()?;
        if config.endpoint_url.trim().is_empty() {
            return Err(UniconError::InvalidConfig("endpointUrl is required".into()));
        }
        let endpoint = UaEndpoint::parse(config.endpoint_url.trim())?;
        if !is_none_security(&config.security_mode) || !is_none_security(&config.security_policy) {
            return Err(UniconError::Protocol(format!(
                "BadSecurityModeRejected: security mode '{}' / policy '{}' is not supported; use None",
                config.security_mode, config.security_policy
            )));
        }
        if config.username.as_deref().is_some_and(|u| !u.is_empty())
            || config.password.as_deref().is_some_and(|p| !p.is_empty())
        {
            return Err(UniconError::Protocol(
                "BadIdentityTokenRejected: username/password identities require an encrypting security policy"
                    .into(),
            ));
        }

        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let url = endpoint.url.clone();
        let transport = tokio::time::timeout(timeout, self.connector.connect(endpoint, timeout))
            .await
            .map_err(|_| {
                UniconError::Timeout(format!(
                    "BadTimeout: connect to {url} timed out after {} ms",
                    timeout.as_millis()
                ))
            })??;
        self.transport = Some(transport);
        self.meta.clear();
        info!("OPC UA connected to {}", url);
        Ok(json!({ "endpointUrl": url, "securityMode": "None" }))
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        self.monitors.drain().await;
        self.meta.clear();
        match self.transport.take() {
            Some(transport) => transport.close().await,
            None => Ok(()),
        }
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        self.monitors.reap();
        match operation {
            "browse" => self.browse(params).await,
            "read" => self.read(params).await,
            "readMeta" => self.read_meta(params).await,
            "write" => self.write(params).await,
            "monitorStart" => self.monitor_start(params).await,
            "monitorStop" => self.monitor_stop(params).await,
            "listSessions" => Ok(json!({ "sessions": self.monitors.list() })),
            _ => Err(UniconError::UnknownOperation {
                protocol: "opcua".into(),
                operation: operation.into(),
            }),
        }
    }

    fn session_count(&self) -> usize {
        self.monitors.len()
    }
}
