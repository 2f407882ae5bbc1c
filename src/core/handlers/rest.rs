// src/core/handlers/rest.rs

//! HTTP/REST handler with optional OpenAPI endpoint discovery.

use super::{HandlerContext, ProtocolHandler, params};
use crate::core::errors::UniconError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const OPERATIONS: &[&str] = &["request", "endpoints"];

const HTTP_METHODS: [&str; 7] = ["get", "post", "put", "delete", "patch", "head", "options"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestConfig {
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    authentication: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    headers: Option<Value>,
    #[serde(default)]
    open_api_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
struct RequestParams {
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default)]
    query: Map<String, Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct EndpointsParams {
    #[serde(default)]
    tag: Option<String>,
}

/// Builds the default headers from the config's `headers` (an object or a
/// JSON string) and its authentication mode.
fn build_headers(config: &RestConfig) -> Result<HeaderMap, UniconError> {
    let mut headers = HeaderMap::new();
    let extra = match &config.headers {
        Some(Value::String(raw)) if !raw.trim().is_empty() => {
            match serde_json::from_str::<Value>(raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Ignoring invalid headers JSON: {}", e);
                    Value::Null
                }
            }
        }
        Some(value) => value.clone(),
        None => Value::Null,
    };
    if let Value::Object(map) = &extra {
        insert_headers(&mut headers, map)?;
    }
    let token = config.token.as_deref().filter(|t| !t.is_empty());
    match (config.authentication.as_deref(), token) {
        (Some("Bearer Token"), Some(token)) => {
            headers.insert("authorization", header_value(&format!("Bearer {token}"))?);
        }
        (Some("API Key"), Some(token)) => {
            headers.insert("x-api-key", header_value(token)?);
        }
        (Some("Basic Auth"), Some(token)) => {
            let encoded = STANDARD.encode(token);
            headers.insert("authorization", header_value(&format!("Basic {encoded}"))?);
        }
        _ => {}
    }
    Ok(headers)
}

fn header_value(raw: &str) -> Result<HeaderValue, UniconError> {
    HeaderValue::from_str(raw).map_err(|e| UniconError::params(format!("invalid header value: {e}")))
}

fn insert_headers(headers: &mut HeaderMap, map: &Map<String, Value>) -> Result<(), UniconError> {
    for (name, value) in map {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| UniconError::params(format!("invalid header name '{name}': {e}")))?;
        headers.insert(name, header_value(&params::stringify(value))?);
    }
    Ok(())
}

fn headers_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        map.insert(
            name.as_str().to_string(),
            Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        );
    }
    Value::Object(map)
}

/// Flattens an OpenAPI document's `paths` into sorted endpoint rows.
pub fn parse_openapi(spec: &Value) -> Vec<Value> {
    let mut endpoints = Vec::new();
    let Some(paths) = spec.get("paths").and_then(Value::as_object) else {
        return endpoints;
    };
    for (path, item) in paths {
        let shared_params = item.get("parameters").cloned().unwrap_or(json!([]));
        for method in HTTP_METHODS {
            let Some(op) = item.get(method) else {
                continue;
            };
            let mut parameters = shared_params.as_array().cloned().unwrap_or_default();
            if let Some(own) = op.get("parameters").and_then(Value::as_array) {
                parameters.extend(own.iter().cloned());
            }
            endpoints.push(json!({
                "method": method.to_ascii_uppercase(),
                "path": path,
                "operationId": op.get("operationId"),
                "summary": op.get("summary"),
                "tags": op.get("tags").cloned().unwrap_or(json!([])),
                "parameters": parameters,
                "deprecated": op.get("deprecated").and_then(Value::as_bool).unwrap_or(false),
            }));
        }
    }
    endpoints.sort_by(|a, b| {
        let key = |v: &Value| {
            (
                v["path"].as_str().unwrap_or("").to_string(),
                v["method"].as_str().unwrap_or("").to_string(),
            )
        };
        key(a).cmp(&key(b))
    });
    endpoints
}

struct Session {
    client: Client,
    base_url: String,
    headers: HeaderMap,
    openapi: Option<Value>,
    endpoints: Vec<Value>,
}

pub struct RestHandler {
    ctx: HandlerContext,
    session: Option<Session>,
}

impl RestHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx, session: None }
    }

    fn session(&self) -> Result<&Session, UniconError> {
        self.session
            .as_ref()
            .ok_or_else(|| UniconError::NotConnected("REST".into()))
    }

    async fn request(&self, p: RequestParams) -> Result<Value, UniconError> {
        let session = self.session()?;
        let method = Method::from_bytes(p.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| UniconError::params(format!("invalid HTTP method '{}'", p.method)))?;
        let url = format!("{}{}", session.base_url, p.endpoint);
        let mut headers = session.headers.clone();
        insert_headers(&mut headers, &p.headers)?;
        let query: Vec<(String, String)> = p
            .query
            .iter()
            .filter(|(_, v)| !v.is_null() && v.as_str() != Some(""))
            .map(|(k, v)| (k.clone(), params::stringify(v)))
            .collect();

        let mut builder = session
            .client
            .request(method.clone(), &url)
            .headers(headers.clone())
            .query(&query);
        if let Some(data) = &p.data
            && matches!(method, Method::POST | Method::PUT | Method::PATCH)
        {
            builder = match data {
                Value::String(body) => builder.body(body.clone()),
                other => builder.json(other),
            };
        }

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        let response_headers = headers_json(response.headers());
        let text = response.text().await?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        let result = json!({
            "status": status.as_u16(),
            "statusText": status.canonical_reason().unwrap_or(""),
            "headers": response_headers,
            "data": body,
            "duration": started.elapsed().as_millis() as u64,
            "request": { "method": method.as_str(), "url": url, "headers": headers_json(&headers) },
        });
        if status.is_client_error() || status.is_server_error() {
            return Err(UniconError::Remote {
                message: format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                ),
                detail: result,
            });
        }
        Ok(result)
    }
}

#[async_trait]
impl ProtocolHandler for RestHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: RestConfig = self.ctx.parse_config()?;
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(UniconError::InvalidConfig("REST baseUrl is required".into()));
        }
        url::Url::parse(&base_url)
            .map_err(|e| UniconError::InvalidConfig(format!("invalid baseUrl: {e}")))?;
        let headers = build_headers(&config)?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        // Any HTTP status proves the endpoint is reachable.
        client.get(&base_url).headers(headers.clone()).send().await?;

        let mut openapi = None;
        if let Some(spec_url) = config.open_api_url.as_deref().filter(|u| !u.is_empty()) {
            match client
                .get(spec_url)
                .header("accept", "application/json")
                .send()
                .await
            {
                Ok(resp) => match resp.json::<Value>().await {
                    Ok(spec) => openapi = Some(spec),
                    Err(e) => warn!("OpenAPI document is not JSON: {}", e),
                },
                Err(e) => warn!("Failed to load OpenAPI document: {}", e),
            }
        }
        let endpoints = openapi.as_ref().map(parse_openapi).unwrap_or_default();
        info!("REST connected to {} ({} endpoints)", base_url, endpoints.len());
        let detail = json!({ "hasOpenApi": openapi.is_some(), "endpoints": endpoints.len() });
        self.session = Some(Session {
            client,
            base_url,
            headers,
            openapi,
            endpoints,
        });
        Ok(detail)
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        self.session = None;
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        match operation {
            "request" => self.request(params::parse(operation, params)?).await,
            "endpoints" => {
                let p: EndpointsParams = params::parse(operation, params)?;
                let session = self.session()?;
                let endpoints: Vec<&Value> = session
                    .endpoints
                    .iter()
                    .filter(|ep| match &p.tag {
                        Some(tag) => ep["tags"]
                            .as_array()
                            .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some(tag))),
                        None => true,
                    })
                    .collect();
                let mut tags: Vec<&str> = session
                    .endpoints
                    .iter()
                    .filter_map(|ep| ep["tags"].as_array())
                    .flatten()
                    .filter_map(Value::as_str)
                    .collect();
                tags.sort_unstable();
                tags.dedup();
                Ok(json!({
                    "endpoints": endpoints,
                    "tags": tags,
                    "hasOpenApi": session.openapi.is_some(),
                    "info": session.openapi.as_ref().and_then(|s| s.get("info")).cloned().unwrap_or(json!({})),
                }))
            }
            _ => Err(UniconError::UnknownOperation {
                protocol: "rest".into(),
                operation: operation.into(),
            }),
        }
    }
}
