// src/core/handlers/k8s/resources.rs

//! The fixed registry of resource kinds the Kubernetes handler understands,
//! and the per-kind summaries built from `kubectl get -o json` items.

use crate::core::errors::UniconError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

/// One resource kind: its kubectl resource name and what it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    /// Plural resource name as kubectl expects it.
    pub name: &'static str,
    pub singular: &'static str,
    pub aliases: &'static [&'static str],
    pub namespaced: bool,
    pub scalable: bool,
    pub restartable: bool,
}

macro_rules! kind {
    ($name:expr, $singular:expr, [$($alias:expr),*], $ns:expr, $scale:expr, $restart:expr) => {
        ResourceKind {
            name: $name,
            singular: $singular,
            aliases: &[$($alias),*],
            namespaced: $ns,
            scalable: $scale,
            restartable: $restart,
        }
    };
}

pub const KINDS: &[ResourceKind] = &[
    kind!("pods", "pod", ["po"], true, false, false),
    kind!("deployments", "deployment", ["deploy"], true, true, true),
    kind!("statefulsets", "statefulset", ["sts"], true, true, true),
    kind!("daemonsets", "daemonset", ["ds"], true, false, true),
    kind!("replicasets", "replicaset", ["rs"], true, true, false),
    kind!("jobs", "job", [], true, false, false),
    kind!("cronjobs", "cronjob", ["cj"], true, false, false),
    kind!("services", "service", ["svc"], true, false, false),
    kind!("ingresses", "ingress", ["ing"], true, false, false),
    kind!("configmaps", "configmap", ["cm"], true, false, false),
    kind!("secrets", "secret", [], true, false, false),
    kind!("namespaces", "namespace", ["ns"], false, false, false),
    kind!("nodes", "node", ["no"], false, false, false),
    kind!("persistentvolumeclaims", "persistentvolumeclaim", ["pvc"], true, false, false),
    kind!("persistentvolumes", "persistentvolume", ["pv"], false, false, false),
    kind!("events", "event", ["ev"], true, false, false),
];

/// Looks a kind up by plural, singular or short alias, ignoring case.
pub fn resolve(kind: &str) -> Result<&'static ResourceKind, UniconError> {
    let wanted = kind.trim().to_ascii_lowercase();
    KINDS
        .iter()
        .find(|k| k.name == wanted || k.singular == wanted || k.aliases.contains(&wanted.as_str()))
        .ok_or_else(|| {
            UniconError::Protocol(format!(
                "unknown resource kind '{kind}'; supported: {}",
                KINDS.iter().map(|k| k.name).collect::<Vec<_>>().join(", ")
            ))
        })
}

/// Compact age the way `kubectl get` prints it: `45s`, `12m`, `3h`, `5d`.
pub fn age(created: Option<&str>, now: DateTime<Utc>) -> Option<String> {
    let created = DateTime::parse_from_rfc3339(created?).ok()?;
    let secs = (now - created.with_timezone(&Utc)).num_seconds().max(0);
    Some(match secs {
        s if s < 120 => format!("{s}s"),
        s if s < 3600 * 2 => format!("{}m", s / 60),
        s if s < 86_400 * 2 => format!("{}h", s / 3600),
        s if s < 86_400 * 365 * 2 => format!("{}d", s / 86_400),
        s => format!("{}y", s / (86_400 * 365)),
    })
}

fn text<'a>(item: &'a Value, pointer: &str) -> Option<&'a str> {
    item.pointer(pointer).and_then(Value::as_str)
}

fn int(item: &Value, pointer: &str) -> i64 {
    item.pointer(pointer).and_then(Value::as_i64).unwrap_or(0)
}

fn items<'a>(item: &'a Value, pointer: &str) -> &'a [Value] {
    item.pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn count(item: &Value, pointer: &str) -> usize {
    item.pointer(pointer)
        .and_then(Value::as_object)
        .map_or(0, Map::len)
}

/// Builds the summary row for one item of `kind`.
pub fn format_row(kind: &ResourceKind, item: &Value, now: DateTime<Utc>) -> Value {
    let mut row = json!({
        "name": text(item, "/metadata/name"),
        "age": age(text(item, "/metadata/creationTimestamp"), now),
    });
    if kind.namespaced {
        row["namespace"] = json!(text(item, "/metadata/namespace"));
    }
    let extra = match kind.name {
        "pods" => pod_row(item),
        "deployments" => json!({
            "ready": format!("{}/{}", int(item, "/status/readyReplicas"), int(item, "/spec/replicas")),
            "upToDate": int(item, "/status/updatedReplicas"),
            "available": int(item, "/status/availableReplicas"),
        }),
        "statefulsets" => json!({
            "ready": format!("{}/{}", int(item, "/status/readyReplicas"), int(item, "/spec/replicas")),
        }),
        "daemonsets" => json!({
            "desired": int(item, "/status/desiredNumberScheduled"),
            "current": int(item, "/status/currentNumberScheduled"),
            "ready": int(item, "/status/numberReady"),
            "upToDate": int(item, "/status/updatedNumberScheduled"),
            "available": int(item, "/status/numberAvailable"),
        }),
        "replicasets" => json!({
            "desired": int(item, "/spec/replicas"),
            "current": int(item, "/status/replicas"),
            "ready": int(item, "/status/readyReplicas"),
        }),
        "jobs" => json!({
            "completions": format!(
                "{}/{}",
                int(item, "/status/succeeded"),
                item.pointer("/spec/completions").and_then(Value::as_i64).unwrap_or(1)
            ),
            "active": int(item, "/status/active"),
            "failed": int(item, "/status/failed"),
        }),
        "cronjobs" => json!({
            "schedule": text(item, "/spec/schedule"),
            "suspend": item.pointer("/spec/suspend").and_then(Value::as_bool).unwrap_or(false),
            "active": items(item, "/status/active").len(),
            "lastSchedule": age(text(item, "/status/lastScheduleTime"), now),
        }),
        "services" => service_row(item),
        "ingresses" => json!({
            "class": text(item, "/spec/ingressClassName"),
            "hosts": items(item, "/spec/rules")
                .iter()
                .filter_map(|r| r.get("host").and_then(Value::as_str))
                .collect::<Vec<_>>(),
            "address": items(item, "/status/loadBalancer/ingress")
                .iter()
                .filter_map(|i| i.get("ip").or_else(|| i.get("hostname")).and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(","),
        }),
        "configmaps" => json!({ "data": count(item, "/data") + count(item, "/binaryData") }),
        "secrets" => json!({ "type": text(item, "/type"), "data": count(item, "/data") }),
        "namespaces" => json!({ "status": text(item, "/status/phase") }),
        "nodes" => node_row(item),
        "persistentvolumeclaims" => json!({
            "status": text(item, "/status/phase"),
            "volume": text(item, "/spec/volumeName"),
            "capacity": text(item, "/status/capacity/storage"),
            "accessModes": item.pointer("/spec/accessModes"),
            "storageClass": text(item, "/spec/storageClassName"),
        }),
        "persistentvolumes" => json!({
            "capacity": text(item, "/spec/capacity/storage"),
            "accessModes": item.pointer("/spec/accessModes"),
            "reclaimPolicy": text(item, "/spec/persistentVolumeReclaimPolicy"),
            "status": text(item, "/status/phase"),
            "claim": match (text(item, "/spec/claimRef/namespace"), text(item, "/spec/claimRef/name")) {
                (Some(ns), Some(name)) => Some(format!("{ns}/{name}")),
                _ => None,
            },
            "storageClass": text(item, "/spec/storageClassName"),
        }),
        "events" => json!({
            "type": text(item, "/type"),
            "reason": text(item, "/reason"),
            "object": format!(
                "{}/{}",
                text(item, "/involvedObject/kind").unwrap_or("").to_ascii_lowercase(),
                text(item, "/involvedObject/name").unwrap_or("")
            ),
            "message": text(item, "/message"),
            "count": int(item, "/count").max(1),
            "lastSeen": age(
                text(item, "/lastTimestamp").or_else(|| text(item, "/eventTime")),
                now
            ),
        }),
        _ => Value::Null,
    };
    if let (Value::Object(map), Value::Object(extra)) = (&mut row, extra) {
        map.extend(extra);
    }
    row
}

fn pod_row(item: &Value) -> Value {
    let statuses = items(item, "/status/containerStatuses");
    let total = items(item, "/spec/containers").len();
    let ready = statuses
        .iter()
        .filter(|s| s.get("ready").and_then(Value::as_bool).unwrap_or(false))
        .count();
    let restarts: i64 = statuses
        .iter()
        .filter_map(|s| s.get("restartCount").and_then(Value::as_i64))
        .sum();
    json!({
        "ready": format!("{ready}/{total}"),
        "status": pod_status(item),
        "phase": text(item, "/status/phase"),
        "restarts": restarts,
        "node": text(item, "/spec/nodeName"),
        "ip": text(item, "/status/podIP"),
        "containers": items(item, "/spec/containers")
            .iter()
            .filter_map(|c| c.get("name").and_then(Value::as_str))
            .collect::<Vec<_>>(),
    })
}

/// The STATUS column: deletion wins, then the first waiting or terminated
/// container reason, then the pod phase.
pub fn pod_status(item: &Value) -> String {
    if item.pointer("/metadata/deletionTimestamp").is_some_and(|v| !v.is_null()) {
        return "Terminating".into();
    }
    for status in items(item, "/status/containerStatuses") {
        let reason = status
            .pointer("/state/waiting/reason")
            .or_else(|| status.pointer("/state/terminated/reason"))
            .and_then(Value::as_str);
        if let Some(reason) = reason {
            return reason.to_string();
        }
    }
    text(item, "/status/reason")
        .or_else(|| text(item, "/status/phase"))
        .unwrap_or("Unknown")
        .to_string()
}

fn service_row(item: &Value) -> Value {
    let ports = items(item, "/spec/ports")
        .iter()
        .map(|p| {
            let port = p.get("port").and_then(Value::as_i64).unwrap_or(0);
            let protocol = p.get("protocol").and_then(Value::as_str).unwrap_or("TCP");
            match p.get("nodePort").and_then(Value::as_i64) {
                Some(node_port) => format!("{port}:{node_port}/{protocol}"),
                None => format!("{port}/{protocol}"),
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    let external: Vec<&str> = items(item, "/status/loadBalancer/ingress")
        .iter()
        .filter_map(|i| i.get("ip").or_else(|| i.get("hostname")).and_then(Value::as_str))
        .chain(
            items(item, "/spec/externalIPs")
                .iter()
                .filter_map(Value::as_str),
        )
        .collect();
    json!({
        "type": text(item, "/spec/type"),
        "clusterIP": text(item, "/spec/clusterIP"),
        "externalIP": if external.is_empty() { "<none>".to_string() } else { external.join(",") },
        "ports": ports,
    })
}

fn node_row(item: &Value) -> Value {
    let ready = items(item, "/status/conditions")
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"))
        .and_then(|c| c.get("status").and_then(Value::as_str));
    let mut status = String::from(if ready == Some("True") { "Ready" } else { "NotReady" });
    if item.pointer("/spec/unschedulable").and_then(Value::as_bool) == Some(true) {
        status.push_str(",SchedulingDisabled");
    }
    let mut roles: Vec<&str> = item
        .pointer("/metadata/labels")
        .and_then(Value::as_object)
        .map(|labels| {
            labels
                .keys()
                .filter_map(|k| k.strip_prefix("node-role.kubernetes.io/"))
                .filter(|r| !r.is_empty())
                .collect()
        })
        .unwrap_or_default();
    roles.sort_unstable();
    let internal_ip = items(item, "/status/addresses")
        .iter()
        .find(|a| a.get("type").and_then(Value::as_str) == Some("InternalIP"))
        .and_then(|a| a.get("address").and_then(Value::as_str));
    json!({
        "status": status,
        "roles": if roles.is_empty() { "<none>".to_string() } else { roles.join(",") },
        "version": text(item, "/status/nodeInfo/kubeletVersion"),
        "internalIP": internal_ip,
    })
}
