// src/core/handlers/soap.rs

//! SOAP 1.1/1.2 handler. The WSDL is fetched and flattened at connect time;
//! calls are sent as document/literal envelopes built from JSON arguments.

use super::{HandlerContext, ProtocolHandler, params};
use crate::core::errors::UniconError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use indexmap::IndexMap;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::reader::Reader;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, info};

pub const OPERATIONS: &[&str] = &["describe", "invoke"];

const SOAP11_ENV: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SOAP12_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";
const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
const PASSWORD_TEXT: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SoapAuth {
    #[serde(default, alias = "kind")]
    r#type: String,
    #[serde(default, alias = "user")]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default = "default_true")]
    has_time_stamp: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SoapConfig {
    #[serde(default, alias = "url", alias = "wsdl")]
    wsdl_url: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default, alias = "security")]
    auth: Option<SoapAuth>,
    #[serde(default)]
    soap_headers: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    include_raw: bool,
}

fn default_timeout_ms() -> u64 {
    15_000
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeOptions {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    soap_headers: Vec<String>,
    #[serde(default)]
    http_headers: Map<String, Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    include_raw: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct InvokeParams {
    method: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    options: InvokeOptions,
}

/// A parsed XML element. Names are local (prefix stripped).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    /// Namespace prefix as written, empty when unprefixed.
    pub prefix: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Depth-first search for the first descendant with this name.
    pub fn find(&self, name: &str) -> Option<&XmlNode> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// Converts to JSON: leaf elements become strings, repeated names arrays.
    pub fn to_json(&self) -> Value {
        if self.children.is_empty() {
            return Value::String(self.text.trim().to_string());
        }
        let mut map = Map::new();
        for child in &self.children {
            let value = child.to_json();
            match map.get_mut(&child.name) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    map.insert(child.name.clone(), value);
                }
            }
        }
        Value::Object(map)
    }
}

fn split_name(raw: &[u8]) -> (String, String) {
    let raw = String::from_utf8_lossy(raw);
    match raw.rsplit_once(':') {
        Some((prefix, local)) => (prefix.to_string(), local.to_string()),
        None => (String::new(), raw.into_owned()),
    }
}

fn open_node(start: &BytesStart<'_>) -> Result<XmlNode, UniconError> {
    let (prefix, name) = split_name(start.name().as_ref());
    let mut node = XmlNode {
        name,
        prefix,
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| UniconError::Protocol(format!("XML attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| UniconError::Protocol(format!("XML attribute: {e}")))?
            .into_owned();
        node.attrs.push((key, value));
    }
    Ok(node)
}

/// Parses a document into its root element.
pub fn parse_xml(xml: &str) -> Result<XmlNode, UniconError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    loop {
        let event = reader
            .read_event()
            .map_err(|e| UniconError::Protocol(format!("XML parse error: {e}")))?;
        match event {
            XmlEvent::Start(start) => stack.push(open_node(&start)?),
            XmlEvent::Empty(start) => {
                let node = open_node(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            XmlEvent::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let text = text
                        .unescape()
                        .map_err(|e| UniconError::Protocol(format!("XML text: {e}")))?;
                    top.text.push_str(&text);
                }
            }
            XmlEvent::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            XmlEvent::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| UniconError::Protocol("XML: unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            XmlEvent::Eof => {
                return Err(UniconError::Protocol("XML: document has no root element".into()));
            }
            _ => {}
        }
    }
}

/// One callable operation from the WSDL.
#[derive(Debug, Clone, PartialEq)]
pub struct SoapOperation {
    pub service: String,
    pub port: String,
    pub name: String,
    pub soap_action: String,
    pub location: String,
    /// Body wrapper element; the operation name unless the input message says otherwise.
    pub element: String,
    pub soap12: bool,
}

impl SoapOperation {
    pub fn fqmn(&self) -> String {
        format!("{}.{}.{}", self.service, self.port, self.name)
    }
}

/// The flattened WSDL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wsdl {
    pub target_namespace: String,
    pub operations: Vec<SoapOperation>,
}

fn strip_prefix(qname: &str) -> &str {
    qname.rsplit_once(':').map(|(_, l)| l).unwrap_or(qname)
}

impl Wsdl {
    pub fn parse(xml: &str) -> Result<Self, UniconError> {
        let root = parse_xml(xml)?;
        if root.name != "definitions" {
            return Err(UniconError::Protocol(format!(
                "not a WSDL 1.1 document (root element '{}')",
                root.name
            )));
        }
        let target_namespace = root.attr("targetNamespace").unwrap_or("").to_string();

        // message name -> first part's element name
        let mut message_elements: IndexMap<String, String> = IndexMap::new();
        for message in root.children_named("message") {
            let element = message
                .children_named("part")
                .find_map(|p| p.attr("element"))
                .map(strip_prefix);
            if let (Some(name), Some(element)) = (message.attr("name"), element) {
                message_elements.insert(name.to_string(), element.to_string());
            }
        }
        // portType -> operation -> input message
        let mut inputs: IndexMap<(String, String), String> = IndexMap::new();
        for port_type in root.children_named("portType") {
            let pt = port_type.attr("name").unwrap_or("");
            for op in port_type.children_named("operation") {
                if let (Some(name), Some(msg)) = (
                    op.attr("name"),
                    op.child("input").and_then(|i| i.attr("message")),
                ) {
                    inputs.insert(
                        (pt.to_string(), name.to_string()),
                        strip_prefix(msg).to_string(),
                    );
                }
            }
        }

        let mut operations = Vec::new();
        for service in root.children_named("service") {
            let service_name = service.attr("name").unwrap_or("Service");
            for port in service.children_named("port") {
                let port_name = port.attr("name").unwrap_or("Port");
                let Some(address) = port.child("address") else {
                    continue;
                };
                let soap12 = namespace_of(&address.prefix, &[address, port, service, &root])
                    .is_some_and(|ns| ns.contains("/wsdl/soap12"));
                let location = address.attr("location").unwrap_or("").to_string();
                let binding_name = strip_prefix(port.attr("binding").unwrap_or(""));
                let Some(binding) = root
                    .children_named("binding")
                    .find(|b| b.attr("name") == Some(binding_name))
                else {
                    continue;
                };
                let port_type = strip_prefix(binding.attr("type").unwrap_or(""));
                for op in binding.children_named("operation") {
                    let Some(name) = op.attr("name") else {
                        continue;
                    };
                    let soap_action = op
                        .child("operation")
                        .and_then(|o| o.attr("soapAction"))
                        .unwrap_or("")
                        .to_string();
                    let element = inputs
                        .get(&(port_type.to_string(), name.to_string()))
                        .and_then(|msg| message_elements.get(msg))
                        .cloned()
                        .unwrap_or_else(|| name.to_string());
                    operations.push(SoapOperation {
                        service: service_name.to_string(),
                        port: port_name.to_string(),
                        name: name.to_string(),
                        soap_action,
                        location: location.clone(),
                        element,
                        soap12,
                    });
                }
            }
        }
        Ok(Self {
            target_namespace,
            operations,
        })
    }

    /// Resolves `Service.Port.Op` exactly, or a bare `Op` to its first binding.
    pub fn resolve(&self, method: &str) -> Option<&SoapOperation> {
        let parts: Vec<&str> = method.split('.').collect();
        if let [service, port, name] = parts.as_slice() {
            return self
                .operations
                .iter()
                .find(|op| op.service == *service && op.port == *port && op.name == *name);
        }
        self.operations.iter().find(|op| op.name == method)
    }

    pub fn describe(&self) -> Value {
        let mut services: Map<String, Value> = Map::new();
        for op in &self.operations {
            let service = services
                .entry(op.service.clone())
                .or_insert_with(|| json!({}));
            if let Value::Object(ports) = service {
                let port = ports.entry(op.port.clone()).or_insert_with(|| json!({}));
                if let Value::Object(ops) = port {
                    ops.insert(
                        op.name.clone(),
                        json!({ "soapAction": op.soap_action, "element": op.element, "location": op.location }),
                    );
                }
            }
        }
        let flat: Vec<Value> = self
            .operations
            .iter()
            .map(|op| {
                json!({ "service": op.service, "port": op.port, "method": op.name, "fqmn": op.fqmn() })
            })
            .collect();
        json!({ "targetNamespace": self.target_namespace, "services": services, "operations": flat })
    }
}

/// Looks up the namespace bound to `prefix`, innermost scope first.
fn namespace_of<'a>(prefix: &str, scopes: &[&'a XmlNode]) -> Option<&'a str> {
    let key = if prefix.is_empty() {
        "xmlns".to_string()
    } else {
        format!("xmlns:{prefix}")
    };
    scopes.iter().find_map(|node| node.attr(&key))
}

/// Serializes JSON arguments as child elements.
pub fn json_to_xml(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::Array(items) => {
                        for item in items {
                            element(key, item, out);
                        }
                    }
                    other => element(key, other, out),
                }
            }
        }
        Value::Null => {}
        other => out.push_str(&escape(params::stringify(other).as_str())),
    }
}

fn element(name: &str, value: &Value, out: &mut String) {
    out.push('<');
    out.push_str(name);
    if value.is_null() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    json_to_xml(value, out);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn wsse_header(auth: &SoapAuth) -> String {
    let mut header = format!(
        "<wsse:Security xmlns:wsse=\"{WSSE_NS}\" xmlns:wsu=\"{WSU_NS}\" soap:mustUnderstand=\"1\">"
    );
    if auth.has_time_stamp {
        let created = Utc::now();
        let expires = created + chrono::Duration::minutes(10);
        header.push_str(&format!(
            "<wsu:Timestamp><wsu:Created>{}</wsu:Created><wsu:Expires>{}</wsu:Expires></wsu:Timestamp>",
            created.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            expires.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        ));
    }
    header.push_str(&format!(
        "<wsse:UsernameToken><wsse:Username>{}</wsse:Username><wsse:Password Type=\"{PASSWORD_TEXT}\">{}</wsse:Password></wsse:UsernameToken></wsse:Security>",
        escape(auth.username.as_str()),
        escape(auth.password.as_str())
    ));
    header
}

/// Builds a complete request envelope.
pub fn build_envelope(
    op: &SoapOperation,
    namespace: &str,
    args: &Value,
    headers: &[String],
) -> String {
    let env = if op.soap12 { SOAP12_ENV } else { SOAP11_ENV };
    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><soap:Envelope xmlns:soap=\"{env}\">"
    );
    if !headers.is_empty() {
        xml.push_str("<soap:Header>");
        for header in headers {
            xml.push_str(header);
        }
        xml.push_str("</soap:Header>");
    }
    xml.push_str("<soap:Body><");
    xml.push_str(&op.element);
    if !namespace.is_empty() {
        xml.push_str(&format!(" xmlns=\"{}\"", escape(namespace)));
    }
    xml.push('>');
    json_to_xml(args, &mut xml);
    xml.push_str("</");
    xml.push_str(&op.element);
    xml.push_str("></soap:Body></soap:Envelope>");
    xml
}

/// Extracts the body payload, or the fault as an error.
pub fn parse_response(xml: &str) -> Result<Value, UniconError> {
    let root = parse_xml(xml)?;
    let body = root
        .child("Body")
        .ok_or_else(|| UniconError::Protocol("SOAP response has no Body".into()))?;
    let Some(payload) = body.children.first() else {
        return Ok(Value::Null);
    };
    if payload.name == "Fault" {
        // SOAP 1.1 uses faultcode/faultstring, 1.2 Code/Reason.
        let code = payload
            .child("faultcode")
            .map(|c| c.text.trim().to_string())
            .or_else(|| payload.find("Value").map(|v| v.text.trim().to_string()))
            .unwrap_or_default();
        let reason = payload
            .child("faultstring")
            .map(|c| c.text.trim().to_string())
            .or_else(|| payload.find("Text").map(|t| t.text.trim().to_string()))
            .unwrap_or_else(|| "unknown fault".to_string());
        return Err(UniconError::Remote {
            message: format!("SOAP Fault: {reason}"),
            detail: json!({
                "faultcode": code,
                "faultstring": reason,
                "detail": payload.child("detail").or_else(|| payload.child("Detail")).map(XmlNode::to_json),
            }),
        });
    }
    let mut result = Map::new();
    result.insert(payload.name.clone(), payload.to_json());
    Ok(Value::Object(result))
}

struct Session {
    client: Client,
    wsdl: Wsdl,
    config: SoapConfig,
}

pub struct SoapHandler {
    ctx: HandlerContext,
    session: Option<Session>,
}

impl SoapHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, session: None }
    }

    fn session(&self) -> Result<&Session, UniconError> {
        self.session
            .as_ref()
            .ok_or_else(|| UniconError::NotConnected("SOAP".into()))
    }

    async fn call(&self, p: InvokeParams) -> Result<Value, UniconError> {
        let session = self.session()?;
        if p.method.trim().is_empty() {
            return Err(UniconError::params("method required"));
        }
        let op = session
            .wsdl
            .resolve(&p.method)
            .ok_or_else(|| UniconError::params(format!("Unknown SOAP method: {}", p.method)))?;

        let mut headers = Vec::new();
        let auth = session.config.auth.clone().unwrap_or_default();
        let kind = auth.r#type.to_ascii_lowercase();
        if kind == "wsse" || kind == "wss" {
            headers.push(wsse_header(&auth));
        }
        headers.extend(session.config.soap_headers.iter().cloned());
        headers.extend(p.options.soap_headers.iter().cloned());
        let envelope = build_envelope(op, &session.wsdl.target_namespace, &p.args, &headers);

        let endpoint = p
            .options
            .endpoint
            .clone()
            .or_else(|| session.config.endpoint.clone())
            .unwrap_or_else(|| op.location.clone());
        if endpoint.is_empty() {
            return Err(UniconError::InvalidConfig(
                "SOAP endpoint unknown; set endpoint in the config".into(),
            ));
        }
        let content_type = if op.soap12 {
            format!("application/soap+xml; charset=utf-8; action=\"{}\"", op.soap_action)
        } else {
            "text/xml; charset=utf-8".to_string()
        };
        let timeout = p.options.timeout_ms.unwrap_or(session.config.timeout_ms).max(1);
        let mut request = session
            .client
            .post(&endpoint)
            .timeout(Duration::from_millis(timeout))
            .header("content-type", content_type)
            .body(envelope.clone());
        if !op.soap12 {
            request = request.header("soapaction", format!("\"{}\"", op.soap_action));
        }
        if kind == "basic" && !auth.username.is_empty() {
            let token = STANDARD.encode(format!("{}:{}", auth.username, auth.password));
            request = request.header("authorization", format!("Basic {token}"));
        }
        for (name, value) in &p.options.http_headers {
            request = request.header(name.as_str(), params::stringify(value));
        }
        debug!("SOAP {} -> {}", op.fqmn(), endpoint);
        let response = request.send().await?;
        let status = response.status();
        let raw = response.text().await?;
        let result = match parse_response(&raw) {
            Ok(result) => result,
            Err(UniconError::Protocol(_)) if !status.is_success() => {
                return Err(UniconError::Remote {
                    message: format!("HTTP {} from SOAP endpoint", status.as_u16()),
                    detail: json!({ "status": status.as_u16(), "body": raw }),
                });
            }
            Err(e) => return Err(e),
        };
        let include_raw = p.options.include_raw.unwrap_or(session.config.include_raw);
        if include_raw {
            Ok(json!({ "result": result, "rawRequest": envelope, "rawResponse": raw }))
        } else {
            Ok(json!({ "result": result }))
        }
    }
}

#[async_trait]
impl ProtocolHandler for SoapHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: SoapConfig = self.ctx.parse_config()?;
        if config.wsdl_url.trim().is_empty() {
            return Err(UniconError::InvalidConfig("wsdlUrl is required".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()?;
        let response = client.get(config.wsdl_url.trim()).send().await?;
        if !response.status().is_success() {
            return Err(UniconError::transport(format!(
                "WSDL fetch failed: HTTP {}",
                response.status().as_u16()
            )));
        }
        let wsdl = Wsdl::parse(&response.text().await?)?;
        info!(
            "SOAP WSDL {} loaded with {} operations",
            config.wsdl_url,
            wsdl.operations.len()
        );
        let detail = json!({ "operations": wsdl.operations.len() });
        self.session = Some(Session {
            client,
            wsdl,
            config,
        });
        Ok(detail)
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        self.session = None;
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        match operation {
            "describe" => Ok(self.session()?.wsdl.describe()),
            "invoke" => self.call(params::parse(operation, params)?).await,
            _ => Err(UniconError::UnknownOperation {
                protocol: "soap".into(),
                operation: operation.into(),
            }),
        }
    }
}
