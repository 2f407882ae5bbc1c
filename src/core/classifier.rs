// src/core/classifier.rs

//! Maps raw transport failures onto a stable `{code, hint}` pair.
//!
//! Classification is a pure function of `(family, message)`: rules are tried in
//! order, the first match wins, every family has a fallback code, and an
//! unrecognized family gets the generic `UNKNOWN_ERROR`. Nothing here can fail.

use crate::core::errors::UniconError;
use crate::core::model::ProtocolFamily;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

/// The classifier's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub code: String,
    pub hint: String,
}

impl Classification {
    fn new(code: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            hint: hint.into(),
        }
    }
}

struct Rule {
    pattern: Regex,
    code: String,
    hint: String,
}

struct FamilyRules {
    rules: Vec<Rule>,
    fallback_code: String,
    fallback_hint: String,
}

const GENERIC_CODE: &str = "UNKNOWN_ERROR";
const GENERIC_HINT: &str = "An unexpected error occurred; check the server log for details.";

const DNS: &str = r"enotfound|eai_again|getaddrinfo|failed to lookup address|name or service not known|no such host|nodename nor servname|dns error|temporary failure in name resolution";
const REFUSED: &str = r"econnrefused|connection refused|actively refused";
const TIMEOUT: &str = r"timed? ?out|etimedout|timeout|deadline (elapsed|exceeded)";
const UNREACHABLE: &str =
    r"ehostunreach|enetunreach|network is unreachable|no route to host|host is unreachable";
const RESET: &str = r"econnreset|connection reset|broken pipe|epipe|connection closed|unexpected eof|socket hang up";
const AUTH: &str = r"authenticat|unauthori[sz]ed|forbidden|permission denied|access denied|login incorrect|invalid credentials|\b401\b|\b403\b";
const TLS: &str = r"certificate|x509|\btls\b|\bssl\b";

fn rule(pattern: &str, code: impl Into<String>, hint: impl Into<String>) -> Option<Rule> {
    Regex::new(&format!("(?i){pattern}"))
        .ok()
        .map(|pattern| Rule {
            pattern,
            code: code.into(),
            hint: hint.into(),
        })
}

/// Hints for the network-level failure kinds every family shares.
struct CommonHints {
    dns: &'static str,
    refused: &'static str,
    timeout: &'static str,
    unreachable: &'static str,
    reset: &'static str,
    auth: &'static str,
    tls: &'static str,
}

fn common_rules(prefix: &str, hints: CommonHints) -> Vec<Option<Rule>> {
    vec![
        rule(DNS, format!("{prefix}_DNS_FAILED"), hints.dns),
        rule(REFUSED, format!("{prefix}_CONNECTION_REFUSED"), hints.refused),
        rule(UNREACHABLE, format!("{prefix}_NETWORK_UNREACHABLE"), hints.unreachable),
        rule(TIMEOUT, format!("{prefix}_TIMEOUT"), hints.timeout),
        rule(RESET, format!("{prefix}_CONNECTION_RESET"), hints.reset),
        rule(AUTH, format!("{prefix}_AUTH_FAILED"), hints.auth),
        rule(TLS, format!("{prefix}_TLS_ERROR"), hints.tls),
    ]
}

fn family(
    specific: Vec<Option<Rule>>,
    common: Vec<Option<Rule>>,
    fallback_code: &str,
    fallback_hint: &str,
) -> FamilyRules {
    FamilyRules {
        rules: specific.into_iter().chain(common).flatten().collect(),
        fallback_code: fallback_code.to_string(),
        fallback_hint: fallback_hint.to_string(),
    }
}

static TABLE: Lazy<HashMap<ProtocolFamily, FamilyRules>> = Lazy::new(build_table);

fn build_table() -> HashMap<ProtocolFamily, FamilyRules> {
    let mut table = HashMap::new();

    table.insert(
        ProtocolFamily::OpcUa,
        family(
            vec![
                rule(
                    r"invalid endpoint|BadTcpEndpointUrlInvalid|opc\.tcp://host:port",
                    "OPCUA_ENDPOINT_INVALID",
                    "Use an endpoint of the form opc.tcp://host:port[/path].",
                ),
                rule(
                    r"BadSecurity|security (mode|policy)|securitymode|security negotiation",
                    "OPCUA_SECURITY_REJECTED",
                    "The server rejected the security mode/policy. Try SecurityMode None or match the server's endpoint settings.",
                ),
                rule(
                    r"BadIdentityToken|BadUserAccessDenied|username/password",
                    "OPCUA_AUTH_FAILED",
                    "The user identity was rejected. Check credentials and that the server allows this token type.",
                ),
                rule(
                    r"BadNodeIdUnknown|BadNodeIdInvalid|invalid node ?id",
                    "OPCUA_NODE_UNKNOWN",
                    "The node id does not exist on the server. Browse to confirm the namespace and identifier.",
                ),
                rule(
                    r"BadNotWritable|BadWriteNotSupported",
                    "OPCUA_NOT_WRITABLE",
                    "The variable is not writable for this user.",
                ),
                rule(
                    r"BadTooManySessions",
                    "OPCUA_TOO_MANY_SESSIONS",
                    "The server has no free sessions. Close other clients or raise the server's session limit.",
                ),
            ],
            common_rules(
                "OPCUA",
                CommonHints {
                    dns: "The OPC UA host name could not be resolved. Check the endpoint host.",
                    refused: "Nothing is listening on the OPC UA port. Verify the server is running and the port (usually 4840).",
                    timeout: "The OPC UA server did not answer in time. Check reachability and raise timeoutMs if the server is slow.",
                    unreachable: "The OPC UA host is not reachable from this machine. Check routing and VPN.",
                    reset: "The OPC UA server closed the channel. Check server logs for rejected hello/open requests.",
                    auth: "The server rejected the session credentials.",
                    tls: "Certificate exchange failed. Only SecurityMode None is supported by this client.",
                },
            ),
            "OPCUA_ERROR",
            "The OPC UA request failed. Check the endpoint, node ids and server status.",
        ),
    );

    table.insert(
        ProtocolFamily::Snmp,
        family(
            vec![
                rule(
                    r"snmp ?v3|version 3|unsupported (snmp )?version",
                    "SNMP_VERSION_UNSUPPORTED",
                    "Only SNMP v1 and v2c are supported. Set version to \"2c\".",
                ),
                rule(
                    r"nosuchname|nosuchobject|nosuchinstance|no such (object|instance)",
                    "SNMP_NO_SUCH_OBJECT",
                    "The device does not implement this OID. Check the profile OIDs or oidOverrides.",
                ),
                rule(
                    r"authorizationerror|noaccess|notwritable|readonly|community",
                    "SNMP_ACCESS_DENIED",
                    "The community string lacks access. Use the write community for set operations.",
                ),
                rule(
                    r"wrongtype|wrongvalue|badvalue|wronglength|inconsistentvalue",
                    "SNMP_BAD_VALUE",
                    "The device rejected the value type or range for this OID.",
                ),
            ],
            common_rules(
                "SNMP",
                CommonHints {
                    dns: "The device host name could not be resolved. Use the device IP address.",
                    refused: "The device refused the UDP datagram (ICMP port unreachable). Check the SNMP port, usually 161.",
                    timeout: "The device did not answer. Check IP, UDP port 161, the community string and any firewall.",
                    unreachable: "The device network is unreachable from this machine.",
                    reset: "The device connection was interrupted.",
                    auth: "The device rejected the credentials.",
                    tls: "Unexpected TLS failure on an SNMP transport.",
                },
            ),
            "SNMP_ERROR",
            "The SNMP request failed. Check the device address, community and OIDs.",
        ),
    );

    table.insert(
        ProtocolFamily::Http,
        family(
            vec![
                rule(
                    r"wsdl",
                    "SOAP_WSDL_UNAVAILABLE",
                    "The WSDL could not be loaded or parsed. Open wsdlUrl in a browser to confirm it is reachable.",
                ),
                rule(
                    r"soap:?fault|faultstring",
                    "SOAP_FAULT",
                    "The service returned a SOAP fault; see the fault string for details.",
                ),
                rule(
                    r"relative url|invalid url|url parse|builder error|empty host",
                    "REST_INVALID_URL",
                    "The URL is malformed. Include the scheme, e.g. https://host/path.",
                ),
                rule(
                    r"\b404\b",
                    "REST_NOT_FOUND",
                    "The endpoint path does not exist on the server.",
                ),
                rule(
                    r"\b5\d\d\b",
                    "REST_SERVER_ERROR",
                    "The server failed to handle the request. Check the server's logs.",
                ),
            ],
            common_rules(
                "REST",
                CommonHints {
                    dns: "The API host name could not be resolved. Check baseUrl and DNS/VPN.",
                    refused: "Nothing is listening at baseUrl. Check the port and that the service is up.",
                    timeout: "The API did not respond in time. Raise timeoutMs or check the service health.",
                    unreachable: "The API host is unreachable. Check proxy and network settings.",
                    reset: "The server closed the connection mid-request.",
                    auth: "The request was not authorized. Check the authentication type and token.",
                    tls: "TLS negotiation failed. Check the certificate chain and that the scheme is https.",
                },
            ),
            "REST_ERROR",
            "The HTTP request failed. Inspect the status and response body.",
        ),
    );

    table.insert(
        ProtocolFamily::Ssh,
        family(
            vec![
                rule(
                    r"host ?key|key mismatch|unknown server key",
                    "SSH_HOST_KEY_REJECTED",
                    "The server host key was rejected.",
                ),
                rule(
                    r"private key|decode.*key|passphrase|could not read key",
                    "SSH_KEY_INVALID",
                    "The private key could not be decoded. Check its format and passphrase.",
                ),
                rule(
                    r"no such file|no_such_file",
                    "SSH_PATH_NOT_FOUND",
                    "The remote path does not exist.",
                ),
                rule(
                    r"publickey|password.*(rejected|incorrect)|authentication",
                    "SSH_AUTH_FAILED",
                    "Authentication failed. Check username, password or private key.",
                ),
                rule(
                    r"subsystem|sftp",
                    "SSH_SFTP_UNAVAILABLE",
                    "The server does not offer the SFTP subsystem.",
                ),
            ],
            common_rules(
                "SSH",
                CommonHints {
                    dns: "The SSH host name could not be resolved.",
                    refused: "The SSH port refused the connection. Check the host and port (usually 22).",
                    timeout: "The SSH handshake timed out. Check reachability and firewall rules.",
                    unreachable: "The SSH host is unreachable from this machine.",
                    reset: "The SSH server closed the connection. Check MaxStartups and server logs.",
                    auth: "Authentication failed. Check username, password or private key.",
                    tls: "Unexpected TLS failure on an SSH transport.",
                },
            ),
            "SSH_ERROR",
            "The SSH operation failed.",
        ),
    );

    table.insert(
        ProtocolFamily::Ftp,
        family(
            vec![
                rule(
                    r"\b530\b|login",
                    "FTP_AUTH_FAILED",
                    "The FTP server rejected the login. Check user and password.",
                ),
                rule(
                    r"\b550\b",
                    "FTP_FILE_UNAVAILABLE",
                    "The file or directory is unavailable (missing or no permission).",
                ),
                rule(
                    r"\b42[56]\b|passive|pasv",
                    "FTP_DATA_CHANNEL",
                    "The passive data connection failed. Check firewall rules for the data port range.",
                ),
            ],
            common_rules(
                "FTP",
                CommonHints {
                    dns: "The FTP host name could not be resolved.",
                    refused: "The FTP port refused the connection. Check the host and port (usually 21).",
                    timeout: "The FTP server did not respond in time.",
                    unreachable: "The FTP host is unreachable.",
                    reset: "The FTP server closed the connection.",
                    auth: "The FTP server rejected the login.",
                    tls: "FTP over TLS is not supported; use plain FTP or SFTP.",
                },
            ),
            "FTP_ERROR",
            "The FTP command failed; see the server reply.",
        ),
    );

    table.insert(
        ProtocolFamily::Sql,
        family(
            vec![
                rule(r"no such table", "SQL_NO_SUCH_TABLE", "The table does not exist. List tables to confirm the name."),
                rule(r"syntax error|near \S+:", "SQL_SYNTAX_ERROR", "The statement has a syntax error."),
                rule(r"constraint", "SQL_CONSTRAINT_VIOLATION", "A constraint (unique, foreign key, not null) rejected the change."),
                rule(r"database is locked|busy", "SQL_BUSY", "The database is locked by another writer. Retry shortly."),
                rule(r"unable to open|cannot open", "SQL_OPEN_FAILED", "The database file could not be opened. Check the filename and permissions."),
                rule(r"driver", "SQL_DRIVER_UNSUPPORTED", "Only the sqlite driver is available."),
            ],
            common_rules(
                "SQL",
                CommonHints {
                    dns: "The database host name could not be resolved.",
                    refused: "The database refused the connection.",
                    timeout: "The query did not finish in time.",
                    unreachable: "The database host is unreachable.",
                    reset: "The database connection was closed.",
                    auth: "The database rejected the credentials.",
                    tls: "TLS negotiation with the database failed.",
                },
            ),
            "SQL_ERROR",
            "The SQL statement failed.",
        ),
    );

    table.insert(
        ProtocolFamily::WebSocket,
        family(
            vec![
                rule(
                    r"url|scheme",
                    "WS_INVALID_URL",
                    "Use a ws:// or wss:// URL.",
                ),
                rule(
                    r"http error|\b(400|404|426)\b|upgrade",
                    "WS_HANDSHAKE_FAILED",
                    "The server refused the WebSocket upgrade. Check the path and subprotocol.",
                ),
                rule(
                    r"already closed|connection closed normally",
                    "WS_CLOSED",
                    "The socket is closed. Reconnect before sending.",
                ),
            ],
            common_rules(
                "WS",
                CommonHints {
                    dns: "The WebSocket host name could not be resolved.",
                    refused: "The WebSocket endpoint refused the connection.",
                    timeout: "The WebSocket handshake timed out.",
                    unreachable: "The WebSocket host is unreachable.",
                    reset: "The WebSocket peer dropped the connection.",
                    auth: "The WebSocket endpoint rejected the credentials.",
                    tls: "TLS negotiation failed; check the wss:// certificate.",
                },
            ),
            "WS_ERROR",
            "The WebSocket operation failed.",
        ),
    );

    table.insert(
        ProtocolFamily::Kubernetes,
        family(
            vec![
                rule(
                    r"kubectl not found|kubectl: no such file|cannot find kubectl",
                    "K8S_KUBECTL_MISSING",
                    "kubectl is not installed or not on PATH. Set tools.kubectl in the server config.",
                ),
                rule(
                    r"context .*(does not exist|not found)|no context exists",
                    "K8S_CONTEXT_INVALID",
                    "The requested context is not in the kubeconfig. List contexts to choose a valid one.",
                ),
                rule(
                    r"kubeconfig|invalid configuration|error loading config",
                    "K8S_CONFIG_INVALID",
                    "The kubeconfig could not be loaded. Check kubeconfigPath or the inline kubeconfig.",
                ),
                rule(
                    r"unable to connect to the server",
                    "K8S_API_UNREACHABLE",
                    "The API server is unreachable. Check the cluster endpoint, VPN and proxy settings.",
                ),
                rule(
                    r"forbidden|unauthorized|must be logged in",
                    "K8S_AUTH_FAILED",
                    "The cluster rejected the request. Check RBAC permissions for this user and namespace.",
                ),
                rule(
                    r"notfound|\(not ?found\)|not found",
                    "K8S_RESOURCE_NOT_FOUND",
                    "The resource does not exist in this namespace.",
                ),
                rule(
                    r"unknown resource kind",
                    "K8S_KIND_UNKNOWN",
                    "Use one of the supported resource kinds.",
                ),
            ],
            common_rules(
                "K8S",
                CommonHints {
                    dns: "The API server host name could not be resolved.",
                    refused: "The API server refused the connection.",
                    timeout: "The API server did not respond in time.",
                    unreachable: "The API server is unreachable.",
                    reset: "The API server closed the connection.",
                    auth: "The cluster rejected the credentials.",
                    tls: "The API server certificate was rejected. Check the kubeconfig's CA data.",
                },
            ),
            "K8S_ERROR",
            "The Kubernetes request failed; see the kubectl output.",
        ),
    );

    table.insert(
        ProtocolFamily::Grpc,
        family(
            vec![
                rule(
                    r"grpcurl not found|grpcurl: no such file|cannot find grpcurl",
                    "GRPC_TOOL_MISSING",
                    "grpcurl is not installed or not on PATH. Set tools.grpcurl in the server config.",
                ),
                rule(
                    r"unimplemented|unknown service|unknown method|could not find|not find",
                    "GRPC_UNIMPLEMENTED",
                    "The service or method does not exist. List services to check the fully-qualified name.",
                ),
                rule(
                    r"reflection|descriptor|\.proto|proto file",
                    "GRPC_SCHEMA_ERROR",
                    "The schema could not be resolved. Enable server reflection or supply the proto file.",
                ),
                rule(
                    r"unauthenticated|permissiondenied|permission denied",
                    "GRPC_AUTH_FAILED",
                    "The call was rejected. Check the authorization metadata headers.",
                ),
                rule(
                    r"code = unavailable|\bunavailable\b",
                    "GRPC_UNAVAILABLE",
                    "The service is unavailable. Check the address and whether TLS/plaintext matches the server.",
                ),
            ],
            common_rules(
                "GRPC",
                CommonHints {
                    dns: "The gRPC host name could not be resolved.",
                    refused: "The gRPC port refused the connection.",
                    timeout: "The gRPC call exceeded its deadline.",
                    unreachable: "The gRPC host is unreachable.",
                    reset: "The gRPC connection was reset. Check plaintext vs TLS.",
                    auth: "The gRPC call was not authorized.",
                    tls: "TLS negotiation failed. Set plaintext if the server does not use TLS.",
                },
            ),
            "GRPC_ERROR",
            "The gRPC call failed.",
        ),
    );

    table.insert(
        ProtocolFamily::LocalFs,
        family(
            vec![
                rule(
                    r"escapes root|outside (of )?(the )?root",
                    "FS_PATH_ESCAPE",
                    "Paths must stay inside the configured root.",
                ),
                rule(r"no such file|not found|enoent", "FS_NOT_FOUND", "The path does not exist."),
                rule(r"permission denied|eacces|eperm", "FS_PERMISSION_DENIED", "The server process lacks permission for this path."),
                rule(r"already exists|eexist", "FS_ALREADY_EXISTS", "The target already exists. Pass overwrite to replace it."),
                rule(
                    r"not a directory|is a directory|directory not empty",
                    "FS_BAD_PATH_KIND",
                    "The path is the wrong kind (file vs directory) for this operation.",
                ),
            ],
            Vec::new(),
            "FS_ERROR",
            "The filesystem operation failed.",
        ),
    );

    table
}

/// Classifies a raw failure message for the given protocol family.
pub fn classify(family: ProtocolFamily, message: &str) -> Classification {
    let Some(rules) = TABLE.get(&family) else {
        return Classification::new(GENERIC_CODE, GENERIC_HINT);
    };
    rules
        .rules
        .iter()
        .find(|rule| rule.pattern.is_match(message))
        .map(|rule| Classification::new(rule.code.clone(), rule.hint.clone()))
        .unwrap_or_else(|| {
            Classification::new(rules.fallback_code.clone(), rules.fallback_hint.clone())
        })
}

/// Classifies a typed error. Structural errors keep their fixed code; transport
/// failures are matched by message.
pub fn classify_error(family: ProtocolFamily, error: &UniconError) -> Classification {
    match (error.fixed_code(), error.fixed_hint()) {
        (Some(code), Some(hint)) => Classification::new(code, hint),
        _ => classify(family, &error.to_string()),
    }
}
