// src/core/handlers/k8s/mod.rs

//! Kubernetes handler driven through `kubectl`. Log tails, exec sessions and
//! port-forwards are long-running `kubectl` children held as sessions.

pub mod resources;

pub use resources::{KINDS, ResourceKind};

use super::params::{self, CommandLine};
use super::process::{self, Framing, ProcessSession, ProcessSpec, StreamEvents};
use super::{HandlerContext, ProtocolHandler};
use crate::core::errors::UniconError;
use crate::core::session::SessionRegistry;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const OPERATIONS: &[&str] = &[
    "listContexts",
    "useContext",
    "listNamespaces",
    "list",
    "listPods",
    "describe",
    "delete",
    "scale",
    "restart",
    "drain",
    "cordon",
    "uncordon",
    "logsStart",
    "logsStop",
    "execOpen",
    "execInput",
    "execClose",
    "portForwardStart",
    "portForwardStop",
    "listSessions",
];

const LOG_EVENTS: StreamEvents = StreamEvents {
    output: "logLine",
    closed: "logClosed",
};
const EXEC_EVENTS: StreamEvents = StreamEvents {
    output: "execOut",
    closed: "execClosed",
};
const PORT_FORWARD_EVENTS: StreamEvents = StreamEvents {
    output: "portForward",
    closed: "portForwardClosed",
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeConfig {
    #[serde(default)]
    kubeconfig: Option<String>,
    #[serde(default)]
    kubeconfig_path: Option<String>,
    #[serde(default)]
    context: Option<String>,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
struct ContextParams {
    context: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    all_namespaces: bool,
}

#[derive(Debug, Deserialize)]
struct ObjectParams {
    kind: String,
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScaleParams {
    kind: String,
    name: String,
    replicas: u32,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrainParams {
    node: String,
    #[serde(default)]
    force: bool,
    #[serde(default = "default_true")]
    ignore_daemonsets: bool,
    #[serde(default = "default_true")]
    delete_emptydir_data: bool,
    #[serde(default)]
    grace_period: Option<i64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct NodeParams {
    node: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogsParams {
    pod: String,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default = "default_tail_lines")]
    tail_lines: i64,
    #[serde(default = "default_true")]
    follow: bool,
}

fn default_tail_lines() -> i64 {
    200
}

#[derive(Debug, Deserialize)]
struct ExecParams {
    pod: String,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    command: Option<CommandLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputParams {
    #[serde(alias = "id")]
    session_id: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    #[serde(alias = "id")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortForwardParams {
    #[serde(default = "default_forward_kind")]
    kind: String,
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    ports: Value,
    #[serde(default)]
    address: Option<String>,
}

fn default_forward_kind() -> String {
    "pod".to_string()
}

/// Accepts `8080`, `"8080:80"` or a list of either.
fn port_specs(ports: &Value) -> Result<Vec<String>, UniconError> {
    let specs: Vec<String> = match ports {
        Value::Array(items) => items.iter().map(params::stringify).collect(),
        Value::Null => Vec::new(),
        other => vec![params::stringify(other)],
    };
    let valid = |spec: &str| {
        let parts: Vec<&str> = spec.split(':').collect();
        parts.len() <= 2
            && parts.last().is_some_and(|p| p.parse::<u16>().is_ok())
            && parts.iter().all(|p| p.is_empty() || p.parse::<u16>().is_ok())
    };
    if specs.is_empty() {
        return Err(UniconError::params("ports required"));
    }
    if let Some(bad) = specs.iter().find(|s| !valid(s.as_str())) {
        return Err(UniconError::params(format!("invalid port spec '{bad}'")));
    }
    Ok(specs)
}

/// A resolved kubeconfig: either the caller's file or an inline document
/// written to a private temporary file for the connection's lifetime.
enum KubeconfigSource {
    Default,
    Path(PathBuf),
    Inline(NamedTempFile),
}

impl KubeconfigSource {
    fn path(&self) -> Option<&Path> {
        match self {
            KubeconfigSource::Default => None,
            KubeconfigSource::Path(path) => Some(path),
            KubeconfigSource::Inline(file) => Some(file.path()),
        }
    }
}

struct Live {
    program: PathBuf,
    kubeconfig: KubeconfigSource,
    context: Option<String>,
    namespace: String,
    timeout: Duration,
}

impl Live {
    /// `--kubeconfig` and `--context` flags that pin every call to this connection.
    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = self.kubeconfig.path() {
            args.push("--kubeconfig".into());
            args.push(path.display().to_string());
        }
        if let Some(context) = &self.context {
            args.push("--context".into());
            args.push(context.clone());
        }
        args
    }

    fn namespace<'a>(&'a self, requested: &'a Option<String>) -> &'a str {
        requested
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.namespace)
    }
}

pub struct KubernetesHandler {
    ctx: HandlerContext,
    live: Option<Live>,
    sessions: SessionRegistry<ProcessSession>,
}

impl KubernetesHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            live: None,
            sessions: SessionRegistry::new(),
        }
    }

    fn live(&self) -> Result<&Live, UniconError> {
        self.live
            .as_ref()
            .ok_or_else(|| UniconError::NotConnected("Kubernetes".into()))
    }

    async fn kubectl<I, S>(&self, args: I) -> Result<String, UniconError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let live = self.live()?;
        let mut full = live.base_args();
        full.extend(args.into_iter().map(Into::into));
        process::run(&live.program, &full, None, live.timeout)
            .await?
            .into_stdout("kubectl")
    }

    async fn kubectl_json<I, S>(&self, args: I) -> Result<Value, UniconError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args: Vec<String> = args.into_iter().map(Into::into).collect();
        args.extend(["-o".to_string(), "json".to_string()]);
        let stdout = self.kubectl(args).await?;
        serde_json::from_str(&stdout)
            .map_err(|e| UniconError::Protocol(format!("kubectl returned malformed JSON: {e}")))
    }

    async fn context_names(&self) -> Result<Vec<String>, UniconError> {
        let stdout = self.kubectl(["config", "get-contexts", "-o", "name"]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn current_context(&self) -> Result<Option<String>, UniconError> {
        if let Some(context) = &self.live()?.context {
            return Ok(Some(context.clone()));
        }
        let stdout = self.kubectl(["config", "current-context"]).await?;
        Ok(Some(stdout.trim().to_string()).filter(|c| !c.is_empty()))
    }

    async fn list_contexts(&self) -> Result<Value, UniconError> {
        let contexts = self.context_names().await?;
        let current = self.current_context().await?;
        Ok(json!({ "contexts": contexts, "current": current }))
    }

    async fn use_context(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: ContextParams = params::parse("useContext", params)?;
        let contexts = self.context_names().await?;
        if !contexts.iter().any(|c| *c == p.context) {
            return Err(UniconError::Remote {
                message: format!("context '{}' does not exist in the kubeconfig", p.context),
                detail: json!({ "contexts": contexts }),
            });
        }
        if let Some(live) = self.live.as_mut() {
            live.context = Some(p.context.clone());
        }
        info!("Switched Kubernetes context to {}", p.context);
        Ok(json!({ "current": p.context }))
    }

    async fn list_namespaces(&self) -> Result<Value, UniconError> {
        let list = self.kubectl_json(["get", "namespaces"]).await?;
        let names: Vec<&str> = list
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.pointer("/metadata/name").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({ "namespaces": names }))
    }

    async fn list_kind(
        &self,
        kind: &'static ResourceKind,
        namespace: &Option<String>,
        all_namespaces: bool,
    ) -> Result<(Option<String>, Vec<Value>), UniconError> {
        let live = self.live()?;
        let mut args = vec!["get".to_string(), kind.name.to_string()];
        let scope = match (kind.namespaced, all_namespaces) {
            (false, _) => None,
            (true, true) => {
                args.push("--all-namespaces".into());
                None
            }
            (true, false) => {
                let ns = live.namespace(namespace).to_string();
                args.extend(["-n".to_string(), ns.clone()]);
                Some(ns)
            }
        };
        let list = self.kubectl_json(args).await?;
        let now = Utc::now();
        let rows = list
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| resources::format_row(kind, item, now))
                    .collect()
            })
            .unwrap_or_default();
        Ok((scope, rows))
    }

    async fn list(&self, params: Value) -> Result<Value, UniconError> {
        let p: ListParams = params::parse("list", params)?;
        let kind = resources::resolve(p.kind.as_deref().unwrap_or("pods"))?;
        let (namespace, items) = self.list_kind(kind, &p.namespace, p.all_namespaces).await?;
        Ok(json!({ "kind": kind.name, "namespace": namespace, "items": items }))
    }

    async fn list_pods(&self, params: Value) -> Result<Value, UniconError> {
        let p: ListParams = params::parse("listPods", params)?;
        let (namespace, pods) = self
            .list_kind(resources::resolve("pods")?, &p.namespace, p.all_namespaces)
            .await?;
        Ok(json!({ "namespace": namespace, "pods": pods }))
    }

    /// Adds `-n <ns>` for namespaced kinds.
    fn scoped_args(&self, kind: &ResourceKind, namespace: &Option<String>) -> Result<Vec<String>, UniconError> {
        let live = self.live()?;
        Ok(if kind.namespaced {
            vec!["-n".into(), live.namespace(namespace).to_string()]
        } else {
            Vec::new()
        })
    }

    async fn describe(&self, params: Value) -> Result<Value, UniconError> {
        let p: ObjectParams = params::parse("describe", params)?;
        let kind = resources::resolve(&p.kind)?;
        let mut args = vec!["describe".to_string(), kind.name.to_string(), p.name.clone()];
        args.extend(self.scoped_args(kind, &p.namespace)?);
        let description = self.kubectl(args).await?;
        Ok(json!({ "kind": kind.name, "name": p.name, "description": description }))
    }

    async fn delete(&self, params: Value) -> Result<Value, UniconError> {
        let p: ObjectParams = params::parse("delete", params)?;
        let kind = resources::resolve(&p.kind)?;
        let mut args = vec![
            "delete".to_string(),
            kind.name.to_string(),
            p.name.clone(),
            "--wait=false".to_string(),
        ];
        args.extend(self.scoped_args(kind, &p.namespace)?);
        let output = self.kubectl(args).await?;
        info!("Deleted {}/{}", kind.name, p.name);
        Ok(json!({ "deleted": true, "kind": kind.name, "name": p.name, "output": output.trim() }))
    }

    async fn scale(&self, params: Value) -> Result<Value, UniconError> {
        let p: ScaleParams = params::parse("scale", params)?;
        let kind = resources::resolve(&p.kind)?;
        if !kind.scalable {
            return Err(UniconError::params(format!("{} cannot be scaled", kind.name)));
        }
        let mut args = vec![
            "scale".to_string(),
            format!("{}/{}", kind.singular, p.name),
            format!("--replicas={}", p.replicas),
        ];
        args.extend(self.scoped_args(kind, &p.namespace)?);
        self.kubectl(args).await?;
        Ok(json!({ "kind": kind.name, "name": p.name, "replicas": p.replicas }))
    }

    async fn restart(&self, params: Value) -> Result<Value, UniconError> {
        let p: ObjectParams = params::parse("restart", params)?;
        let kind = resources::resolve(&p.kind)?;
        if !kind.restartable {
            return Err(UniconError::params(format!("{} cannot be restarted", kind.name)));
        }
        let mut args = vec![
            "rollout".to_string(),
            "restart".to_string(),
            format!("{}/{}", kind.singular, p.name),
        ];
        args.extend(self.scoped_args(kind, &p.namespace)?);
        self.kubectl(args).await?;
        Ok(json!({ "kind": kind.name, "name": p.name, "restarted": true }))
    }

    async fn drain(&self, params: Value) -> Result<Value, UniconError> {
        let p: DrainParams = params::parse("drain", params)?;
        let mut args = vec!["drain".to_string(), p.node.clone()];
        if p.ignore_daemonsets {
            args.push("--ignore-daemonsets".into());
        }
        if p.delete_emptydir_data {
            args.push("--delete-emptydir-data".into());
        }
        if p.force {
            args.push("--force".into());
        }
        if let Some(grace) = p.grace_period {
            args.push(format!("--grace-period={grace}"));
        }
        let output = self.kubectl(args).await?;
        Ok(json!({ "node": p.node, "drained": true, "output": output.trim() }))
    }

    async fn set_schedulable(&self, operation: &str, params: Value) -> Result<Value, UniconError> {
        let p: NodeParams = params::parse(operation, params)?;
        self.kubectl([operation.to_string(), p.node.clone()]).await?;
        Ok(json!({ "node": p.node, "unschedulable": operation == "cordon" }))
    }

    fn start_session(
        &mut self,
        kind: &'static str,
        args: Vec<String>,
        interactive: bool,
        framing: Framing,
        events: StreamEvents,
        tags: Value,
    ) -> Result<String, UniconError> {
        let live = self.live()?;
        let mut full = live.base_args();
        full.extend(args);
        let spec = ProcessSpec {
            program: live.program.clone(),
            args: full,
            interactive,
            framing,
            events,
            tags,
        };
        let session_id = SessionRegistry::<ProcessSession>::next_id();
        let session = ProcessSession::spawn(kind, spec, &self.ctx, &session_id)?;
        self.sessions.insert(session_id.clone(), session);
        Ok(session_id)
    }

    fn logs_start(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: LogsParams = params::parse("logsStart", params)?;
        let namespace = self.live()?.namespace(&p.namespace).to_string();
        let mut args = vec![
            "logs".to_string(),
            p.pod.clone(),
            "-n".into(),
            namespace.clone(),
            format!("--tail={}", p.tail_lines),
        ];
        if p.follow {
            args.push("-f".into());
        }
        if let Some(container) = &p.container {
            args.extend(["-c".to_string(), container.clone()]);
        }
        let tags = json!({ "pod": p.pod, "container": p.container, "namespace": namespace });
        let session_id =
            self.start_session("logs", args, false, Framing::Lines, LOG_EVENTS, tags)?;
        Ok(json!({ "sessionId": session_id }))
    }

    fn exec_open(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: ExecParams = params::parse("execOpen", params)?;
        let namespace = self.live()?.namespace(&p.namespace).to_string();
        let command = p
            .command
            .map(CommandLine::into_argv)
            .filter(|argv| !argv.is_empty())
            .unwrap_or_else(|| vec!["/bin/sh".to_string()]);
        let mut args = vec![
            "exec".to_string(),
            "-i".into(),
            p.pod.clone(),
            "-n".into(),
            namespace.clone(),
        ];
        if let Some(container) = &p.container {
            args.extend(["-c".to_string(), container.clone()]);
        }
        args.push("--".into());
        args.extend(command.iter().cloned());
        let tags = json!({ "pod": p.pod, "container": p.container, "namespace": namespace });
        let session_id =
            self.start_session("exec", args, true, Framing::Chunks, EXEC_EVENTS, tags)?;
        Ok(json!({ "sessionId": session_id, "command": command }))
    }

    async fn exec_input(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: InputParams = params::parse("execInput", params)?;
        let session = self
            .sessions
            .get_mut(&p.session_id)
            .ok_or_else(|| UniconError::SessionNotFound(p.session_id.clone()))?;
        session.write(p.data.as_bytes()).await?;
        Ok(json!({ "sessionId": p.session_id, "bytes": p.data.len() }))
    }

    fn port_forward_start(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: PortForwardParams = params::parse("portForwardStart", params)?;
        let kind = resources::resolve(&p.kind)?;
        let ports = port_specs(&p.ports)?;
        let namespace = self.live()?.namespace(&p.namespace).to_string();
        let mut args = vec![
            "port-forward".to_string(),
            format!("{}/{}", kind.singular, p.name),
            "-n".into(),
            namespace.clone(),
        ];
        if let Some(address) = &p.address {
            args.push(format!("--address={address}"));
        }
        args.extend(ports.iter().cloned());
        let tags = json!({ "kind": kind.name, "name": p.name, "namespace": namespace, "ports": ports });
        let session_id = self.start_session(
            "portForward",
            args,
            false,
            Framing::Lines,
            PORT_FORWARD_EVENTS,
            tags,
        )?;
        Ok(json!({ "sessionId": session_id, "ports": ports }))
    }

    async fn stop_session(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        let p: SessionParams = params::parse(operation, params)?;
        let stopped = self.sessions.remove(&p.session_id).await;
        Ok(json!({ "sessionId": p.session_id, "stopped": stopped }))
    }
}

fn write_inline_kubeconfig(document: &str) -> Result<NamedTempFile, UniconError> {
    let mut file = tempfile::Builder::new()
        .prefix("unicon-kubeconfig-")
        .suffix(".yaml")
        .tempfile()?;
    file.write_all(document.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[async_trait]
impl ProtocolHandler for KubernetesHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: KubeConfig = self.ctx.parse_config()?;
        let program = process::locate(self.ctx.settings.kubectl_path.as_deref(), "kubectl")?;
        let kubeconfig = match (
            config.kubeconfig.as_deref().filter(|k| !k.trim().is_empty()),
            config.kubeconfig_path.as_deref().filter(|p| !p.trim().is_empty()),
        ) {
            (Some(inline), _) => KubeconfigSource::Inline(write_inline_kubeconfig(inline)?),
            (None, Some(path)) => {
                let path = PathBuf::from(path);
                if !path.is_file() {
                    return Err(UniconError::Transport(format!(
                        "kubeconfig {} does not exist",
                        path.display()
                    )));
                }
                KubeconfigSource::Path(path)
            }
            (None, None) => KubeconfigSource::Default,
        };
        self.live = Some(Live {
            program,
            kubeconfig,
            context: config.context.filter(|c| !c.is_empty()),
            namespace: config.namespace,
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
        });

        // Loading the contexts validates the kubeconfig without touching the cluster.
        let outcome = async {
            let contexts = self.context_names().await?;
            if let Some(wanted) = self.live()?.context.as_ref()
                && !contexts.contains(wanted)
            {
                return Err(UniconError::Remote {
                    message: format!("context '{wanted}' does not exist in the kubeconfig"),
                    detail: json!({ "contexts": contexts }),
                });
            }
            self.current_context().await
        }
        .await;
        match outcome {
            Ok(context) => {
                let live = self.live()?;
                debug!("kubectl at {} using context {:?}", live.program.display(), context);
                Ok(json!({ "context": context, "namespace": live.namespace }))
            }
            Err(e) => {
                self.live = None;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        self.sessions.drain().await;
        // Dropping the source removes an inline kubeconfig file.
        self.live = None;
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        self.sessions.reap();
        match operation {
            "listContexts" => self.list_contexts().await,
            "useContext" => self.use_context(params).await,
            "listNamespaces" => self.list_namespaces().await,
            "list" => self.list(params).await,
            "listPods" => self.list_pods(params).await,
            "describe" => self.describe(params).await,
            "delete" => self.delete(params).await,
            "scale" => self.scale(params).await,
            "restart" => self.restart(params).await,
            "drain" => self.drain(params).await,
            "cordon" | "uncordon" => self.set_schedulable(operation, params).await,
            "logsStart" => self.logs_start(params),
            "execOpen" => self.exec_open(params),
            "execInput" => self.exec_input(params).await,
            "portForwardStart" => self.port_forward_start(params),
            "logsStop" | "execClose" | "portForwardStop" => {
                self.stop_session(operation, params).await
            }
            "listSessions" => Ok(json!({ "sessions": self.sessions.list() })),
            _ => Err(UniconError::UnknownOperation {
                protocol: "k8s".into(),
                operation: operation.into(),
            }),
        }
    }

    fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
