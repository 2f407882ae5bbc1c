// tests/unit_classifier_test.rs

use strum::IntoEnumIterator;
use unicon::core::classifier::{classify, classify_error};
use unicon::core::{ProtocolFamily, UniconError};

#[test]
fn test_opcua_connection_refused() {
    let c = classify(ProtocolFamily::OpcUa, "connect ECONNREFUSED 127.0.0.1:4840");
    assert_eq!(c.code, "OPCUA_CONNECTION_REFUSED");
    assert!(c.hint.contains("4840"));
}

#[test]
fn test_opcua_specific_rules_win_over_common_ones() {
    let c = classify(
        ProtocolFamily::OpcUa,
        "BadSecurityModeRejected: security mode 'Sign' / policy 'Basic256' is not supported",
    );
    assert_eq!(c.code, "OPCUA_SECURITY_REJECTED");

    let c = classify(ProtocolFamily::OpcUa, "BadNodeIdUnknown: ns=2;s=Missing");
    assert_eq!(c.code, "OPCUA_NODE_UNKNOWN");
}

#[test]
fn test_snmp_timeout() {
    let c = classify(
        ProtocolFamily::Snmp,
        "SNMP request timed out after 5000 ms (3 attempts) to 10.0.0.5:161",
    );
    assert_eq!(c.code, "SNMP_TIMEOUT");
    assert!(c.hint.contains("161"));
}

#[test]
fn test_snmp_error_status_names() {
    assert_eq!(
        classify(ProtocolFamily::Snmp, "SNMP error noSuchName (2) at 1.3.6.1.2.1.1.9.0").code,
        "SNMP_NO_SUCH_OBJECT"
    );
    assert_eq!(
        classify(ProtocolFamily::Snmp, "SNMP error notWritable (17)").code,
        "SNMP_ACCESS_DENIED"
    );
    assert_eq!(
        classify(ProtocolFamily::Snmp, "SNMP error wrongType (7)").code,
        "SNMP_BAD_VALUE"
    );
}

#[test]
fn test_http_family_status_codes() {
    assert_eq!(
        classify(ProtocolFamily::Http, "HTTP 404 Not Found: GET /api/v1/missing").code,
        "REST_NOT_FOUND"
    );
    assert_eq!(
        classify(ProtocolFamily::Http, "HTTP 503 Service Unavailable").code,
        "REST_SERVER_ERROR"
    );
    assert_eq!(
        classify(ProtocolFamily::Http, "HTTP 401 Unauthorized").code,
        "REST_AUTH_FAILED"
    );
}

#[test]
fn test_soap_fault_and_wsdl() {
    assert_eq!(
        classify(ProtocolFamily::Http, "soap:Fault: Server was unable to process request").code,
        "SOAP_FAULT"
    );
    assert_eq!(
        classify(ProtocolFamily::Http, "failed to load WSDL from http://x/svc?wsdl").code,
        "SOAP_WSDL_UNAVAILABLE"
    );
}

#[test]
fn test_kubernetes_missing_tool_and_context() {
    assert_eq!(
        classify(
            ProtocolFamily::Kubernetes,
            "kubectl not found: not installed or not on PATH"
        )
        .code,
        "K8S_KUBECTL_MISSING"
    );
    assert_eq!(
        classify(
            ProtocolFamily::Kubernetes,
            "context 'prod' does not exist in the kubeconfig"
        )
        .code,
        "K8S_CONTEXT_INVALID"
    );
    assert_eq!(
        classify(
            ProtocolFamily::Kubernetes,
            "kubectl: Error from server (NotFound): pods \"web-0\" not found"
        )
        .code,
        "K8S_RESOURCE_NOT_FOUND"
    );
}

#[test]
fn test_grpc_missing_tool() {
    let c = classify(
        ProtocolFamily::Grpc,
        "grpcurl not found: not installed or not on PATH",
    );
    assert_eq!(c.code, "GRPC_TOOL_MISSING");
}

#[test]
fn test_matching_is_case_insensitive() {
    let lower = classify(ProtocolFamily::Ssh, "connection refused");
    let upper = classify(ProtocolFamily::Ssh, "CONNECTION REFUSED");
    assert_eq!(lower, upper);
    assert_eq!(lower.code, "SSH_CONNECTION_REFUSED");
}

#[test]
fn test_unmatched_message_uses_family_fallback() {
    assert_eq!(
        classify(ProtocolFamily::Sql, "something odd happened").code,
        "SQL_ERROR"
    );
    assert_eq!(
        classify(ProtocolFamily::WebSocket, "something odd happened").code,
        "WS_ERROR"
    );
}

#[test]
fn test_unknown_family_is_generic() {
    let c = classify(ProtocolFamily::Unknown, "connection refused");
    assert_eq!(c.code, "UNKNOWN_ERROR");
    assert!(!c.hint.is_empty());
}

#[test]
fn test_structural_errors_keep_fixed_codes() {
    let c = classify_error(
        ProtocolFamily::OpcUa,
        &UniconError::NotActive("abc".into()),
    );
    assert_eq!(c.code, "NOT_ACTIVE");

    let c = classify_error(
        ProtocolFamily::Kubernetes,
        &UniconError::UnknownOperation {
            protocol: "k8s".into(),
            operation: "explode".into(),
        },
    );
    assert_eq!(c.code, "UNKNOWN_OPERATION");

    let c = classify_error(
        ProtocolFamily::OpcUa,
        &UniconError::ShapeMismatch("BadTypeMismatch: scalar expected".into()),
    );
    assert_eq!(c.code, "SHAPE_MISMATCH");
}

#[test]
fn test_transport_errors_are_classified_by_message() {
    let c = classify_error(
        ProtocolFamily::Ftp,
        &UniconError::Transport("getaddrinfo ENOTFOUND ftp.invalid".into()),
    );
    assert_eq!(c.code, "FTP_DNS_FAILED");

    let c = classify_error(
        ProtocolFamily::Snmp,
        &UniconError::Timeout("deadline elapsed".into()),
    );
    assert_eq!(c.code, "SNMP_TIMEOUT");
}

#[test]
fn test_every_family_has_a_fallback() {
    for family in ProtocolFamily::iter() {
        let c = classify(family, "");
        assert!(!c.code.is_empty(), "{family} has no fallback code");
        assert!(!c.hint.is_empty(), "{family} has no fallback hint");
    }
}

#[test]
fn test_classification_is_deterministic() {
    let message = "read ECONNRESET while talking to the device";
    for family in ProtocolFamily::iter() {
        assert_eq!(classify(family, message), classify(family, message));
    }
}
