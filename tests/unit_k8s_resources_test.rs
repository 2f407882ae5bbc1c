// tests/unit_k8s_resources_test.rs

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use unicon::core::handlers::k8s::resources::{KINDS, age, format_row, pod_status, resolve};

#[test]
fn test_resolve_by_plural_singular_and_alias() {
    assert_eq!(resolve("pods").unwrap().name, "pods");
    assert_eq!(resolve("Deployment").unwrap().name, "deployments");
    assert_eq!(resolve("sts").unwrap().name, "statefulsets");
    assert_eq!(resolve(" svc ").unwrap().name, "services");
}

#[test]
fn test_resolve_unknown_kind_lists_supported() {
    let err = resolve("widgets").unwrap_err();
    assert!(err.to_string().contains("widgets"));
    assert!(err.to_string().contains("deployments"));
}

#[test]
fn test_kind_capabilities() {
    assert!(resolve("deploy").unwrap().scalable);
    assert!(resolve("ds").unwrap().restartable);
    assert!(!resolve("ds").unwrap().scalable);
    assert!(!resolve("nodes").unwrap().namespaced);
    assert!(KINDS.iter().all(|k| !k.name.is_empty() && k.name.ends_with('s')));
}

#[test]
fn test_age_buckets() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let ago = |d: Duration| Some((now - d).to_rfc3339());

    assert_eq!(age(ago(Duration::seconds(45)).as_deref(), now).as_deref(), Some("45s"));
    assert_eq!(age(ago(Duration::minutes(12)).as_deref(), now).as_deref(), Some("12m"));
    assert_eq!(age(ago(Duration::hours(3)).as_deref(), now).as_deref(), Some("3h"));
    assert_eq!(age(ago(Duration::days(5)).as_deref(), now).as_deref(), Some("5d"));
    assert_eq!(age(None, now), None);
    assert_eq!(age(Some("not a time"), now), None);
}

#[test]
fn test_pod_row_summarizes_containers() {
    let now = Utc::now();
    let pod = json!({
        "metadata": {
            "name": "web-0",
            "namespace": "shop",
            "creationTimestamp": (now - Duration::minutes(30)).to_rfc3339(),
        },
        "spec": {
            "nodeName": "worker-1",
            "containers": [{ "name": "app" }, { "name": "sidecar" }],
        },
        "status": {
            "phase": "Running",
            "podIP": "10.1.0.7",
            "containerStatuses": [
                { "ready": true, "restartCount": 2, "state": { "running": {} } },
                { "ready": false, "restartCount": 1, "state": { "running": {} } },
            ],
        },
    });
    let row = format_row(resolve("pods").unwrap(), &pod, now);

    assert_eq!(row["name"], "web-0");
    assert_eq!(row["namespace"], "shop");
    assert_eq!(row["ready"], "1/2");
    assert_eq!(row["restarts"], 3);
    assert_eq!(row["status"], "Running");
    assert_eq!(row["age"], "30m");
    assert_eq!(row["containers"], json!(["app", "sidecar"]));
}

#[test]
fn test_pod_status_precedence() {
    let waiting = json!({
        "status": {
            "phase": "Pending",
            "containerStatuses": [{ "state": { "waiting": { "reason": "CrashLoopBackOff" } } }],
        }
    });
    assert_eq!(pod_status(&waiting), "CrashLoopBackOff");

    let deleting = json!({
        "metadata": { "deletionTimestamp": "2024-01-01T00:00:00Z" },
        "status": { "phase": "Running" },
    });
    assert_eq!(pod_status(&deleting), "Terminating");

    let evicted = json!({ "status": { "phase": "Failed", "reason": "Evicted" } });
    assert_eq!(pod_status(&evicted), "Evicted");

    assert_eq!(pod_status(&json!({})), "Unknown");
}

#[test]
fn test_service_row() {
    let svc = json!({
        "metadata": { "name": "api", "namespace": "default" },
        "spec": {
            "type": "NodePort",
            "clusterIP": "10.96.0.10",
            "ports": [
                { "port": 80, "nodePort": 30080, "protocol": "TCP" },
                { "port": 53, "protocol": "UDP" },
            ],
        },
    });
    let row = format_row(resolve("svc").unwrap(), &svc, Utc::now());
    assert_eq!(row["type"], "NodePort");
    assert_eq!(row["ports"], "80:30080/TCP,53/UDP");
    assert_eq!(row["externalIP"], "<none>");
}

#[test]
fn test_node_row_is_cluster_scoped() {
    let node = json!({
        "metadata": {
            "name": "cp-1",
            "labels": {
                "node-role.kubernetes.io/control-plane": "",
                "kubernetes.io/hostname": "cp-1",
            },
        },
        "spec": { "unschedulable": true },
        "status": {
            "conditions": [{ "type": "Ready", "status": "True" }],
            "nodeInfo": { "kubeletVersion": "v1.30.1" },
            "addresses": [{ "type": "InternalIP", "address": "192.168.0.10" }],
        },
    });
    let row = format_row(resolve("node").unwrap(), &node, Utc::now());
    assert!(row.get("namespace").is_none());
    assert_eq!(row["status"], "Ready,SchedulingDisabled");
    assert_eq!(row["roles"], "control-plane");
    assert_eq!(row["internalIP"], "192.168.0.10");
}

#[test]
fn test_deployment_and_secret_rows() {
    let deploy = json!({
        "metadata": { "name": "web" },
        "spec": { "replicas": 3 },
        "status": { "readyReplicas": 2, "updatedReplicas": 3, "availableReplicas": 2 },
    });
    let row = format_row(resolve("deployments").unwrap(), &deploy, Utc::now());
    assert_eq!(row["ready"], "2/3");
    assert_eq!(row["upToDate"], 3);

    let secret = json!({
        "metadata": { "name": "creds" },
        "type": "Opaque",
        "data": { "user": "YQ==", "pass": "Yg==" },
    });
    let row = format_row(resolve("secret").unwrap(), &secret, Utc::now());
    assert_eq!(row["type"], "Opaque");
    assert_eq!(row["data"], 2);
}
