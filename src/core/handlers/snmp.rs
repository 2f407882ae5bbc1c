// src/core/handlers/snmp.rs

//! SNMP v1/v2c handler with NTCIP device profiles.
//!
//! The generic profile exposes raw get/set/walk. The ESS (NTCIP 1204) and VMS
//! (NTCIP 1203) profiles add convenience reads and writes over well-known
//! object ids, any of which can be replaced through `oidOverrides`.

use super::{HandlerContext, ProtocolHandler, params};
use crate::core::errors::UniconError;
use crate::core::protocol::snmp::{Oid, SnmpClient, SnmpTarget, SnmpValue, SnmpVersion, VarBind};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub const GENERIC_OPERATIONS: &[&str] = &["get", "bulkGet", "set", "getTable"];
pub const ESS_OPERATIONS: &[&str] = &["get", "bulkGet", "set", "getTable", "readSnapshot"];
pub const VMS_OPERATIONS: &[&str] = &[
    "get",
    "bulkGet",
    "set",
    "getTable",
    "getStatus",
    "setMessage",
];

const WALK_MAX_REPETITIONS: i64 = 10;

const ESS_BASE: &str = "1.3.6.1.4.1.1206.4.2.3.3";
const VMS_BASE: &str = "1.3.6.1.4.1.1206.4.2.3.5";

/// Which object set the handler speaks on top of plain SNMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    Generic,
    Ess,
    Vms,
}

impl DeviceProfile {
    fn label(self) -> &'static str {
        match self {
            DeviceProfile::Generic => "SNMP",
            DeviceProfile::Ess => "ESS",
            DeviceProfile::Vms => "VMS",
        }
    }

    /// Named object ids and their defaults. Names are the keys accepted in
    /// `oidOverrides`.
    fn default_oids(self) -> Vec<(&'static str, String)> {
        match self {
            DeviceProfile::Generic => vec![("sysDescr", "1.3.6.1.2.1.1.1.0".to_string())],
            DeviceProfile::Ess => [
                ("essSystemVersion", ".1.1.0"),
                ("essSystemType", ".1.2.0"),
                ("essAirTemperature", ".3.1.1.0"),
                ("essRelativeHumidity", ".3.2.1.0"),
                ("essWindSpeed", ".3.3.1.0"),
                ("essWindDirection", ".3.3.2.0"),
                ("essPrecipitationRate", ".3.4.1.0"),
                ("essVisibility", ".3.5.1.0"),
            ]
            .into_iter()
            .map(|(name, suffix)| (name, format!("{ESS_BASE}{suffix}")))
            .collect(),
            DeviceProfile::Vms => [
                ("vmsSystemVersion", ".1.1.0"),
                ("vmsSystemType", ".1.2.0"),
                ("vmsSignStatus", ".3.1.0"),
                ("vmsCurrentMessageNumber", ".3.2.0"),
                ("vmsCurrentMessageCRC", ".3.3.0"),
                ("vmsErrorStatus", ".3.4.0"),
                ("vmsSignBrightness", ".3.5.0"),
                ("vmsMessageText", ".4.1.2.1.0"),
                ("vmsMessageBeacon", ".4.1.3.1.0"),
                ("vmsMessagePixelService", ".4.1.4.1.0"),
            ]
            .into_iter()
            .map(|(name, suffix)| (name, format!("{VMS_BASE}{suffix}")))
            .collect(),
        }
    }

    /// The object read by `connect` to prove the agent answers.
    fn probe_key(self) -> &'static str {
        match self {
            DeviceProfile::Generic => "sysDescr",
            DeviceProfile::Ess => "essSystemVersion",
            DeviceProfile::Vms => "vmsSystemVersion",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnmpConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_version")]
    version: Value,
    #[serde(default = "default_community")]
    community: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_retries")]
    retries: u32,
    #[serde(default)]
    oid_overrides: HashMap<String, String>,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    161
}
fn default_version() -> Value {
    json!("2c")
}
fn default_community() -> String {
    "public".to_string()
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_retries() -> u32 {
    2
}

fn parse_version(raw: &Value) -> Result<SnmpVersion, UniconError> {
    match params::stringify(raw).trim().to_ascii_lowercase().as_str() {
        "" | "2c" | "2" | "v2c" => Ok(SnmpVersion::V2c),
        "1" | "v1" => Ok(SnmpVersion::V1),
        "3" | "v3" => Err(UniconError::Unsupported(
            "SNMPv3 (USM) is not supported; use version 1 or 2c".into(),
        )),
        other => Err(UniconError::InvalidConfig(format!(
            "unknown SNMP version '{other}'"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct OidsParams {
    oids: params::OneOrMany,
}

#[derive(Debug, Deserialize)]
struct SetParams {
    varbinds: Vec<SetDescriptor>,
}

/// One typed write: `{oid, type, value}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetDescriptor {
    pub oid: String,
    #[serde(rename = "type", default)]
    pub value_type: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableParams {
    base_oid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageParams {
    #[serde(default)]
    message_text: String,
    #[serde(default = "default_message_number")]
    message_number: u32,
    #[serde(default)]
    beacon: Option<i64>,
    #[serde(default)]
    pixel_service: Option<i64>,
}

fn default_message_number() -> u32 {
    1
}

/// Reads an integer the way a loosely-typed form field arrives: numbers are
/// truncated, strings are parsed after trimming.
fn integer_of(value: &Value) -> Result<i64, UniconError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| UniconError::TypeMismatch(format!("{n} is not an integer"))),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f.trunc() as i64))
                .map_err(|_| UniconError::TypeMismatch(format!("'{s}' is not an integer")))
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(UniconError::TypeMismatch(format!("{other} is not an integer"))),
    }
}

fn unsigned_of(value: &Value, type_name: &str) -> Result<u32, UniconError> {
    let n = integer_of(value)?;
    u32::try_from(n)
        .map_err(|_| UniconError::TypeMismatch(format!("{n} is out of range for {type_name}")))
}

/// Converts a write descriptor into a typed varbind. Unknown type names fall
/// back to integer.
pub fn coerce_varbind(descriptor: &SetDescriptor) -> Result<VarBind, UniconError> {
    let oid = Oid::from_str(&descriptor.oid)?;
    let value = match descriptor.value_type.trim().to_ascii_lowercase().as_str() {
        "octetstring" | "string" => {
            SnmpValue::OctetString(params::stringify(&descriptor.value).into_bytes())
        }
        "oid" | "objectid" | "objectidentifier" => {
            SnmpValue::ObjectId(Oid::from_str(&params::stringify(&descriptor.value))?)
        }
        "gauge" | "gauge32" => SnmpValue::Gauge32(unsigned_of(&descriptor.value, "Gauge32")?),
        "counter" | "counter32" => {
            SnmpValue::Counter32(unsigned_of(&descriptor.value, "Counter32")?)
        }
        "timeticks" => SnmpValue::TimeTicks(unsigned_of(&descriptor.value, "TimeTicks")?),
        "ipaddress" => {
            let text = params::stringify(&descriptor.value);
            let ip: std::net::Ipv4Addr = text.trim().parse().map_err(|_| {
                UniconError::TypeMismatch(format!("'{text}' is not an IPv4 address"))
            })?;
            SnmpValue::IpAddress(ip.octets())
        }
        _ => SnmpValue::Integer(integer_of(&descriptor.value)?),
    };
    Ok(VarBind { oid, value })
}

fn varbinds_to_map(varbinds: &[VarBind]) -> Map<String, Value> {
    varbinds
        .iter()
        .map(|vb| (vb.oid.to_string(), vb.value.to_json()))
        .collect()
}

pub struct SnmpHandler {
    ctx: HandlerContext,
    profile: DeviceProfile,
    oids: HashMap<String, String>,
    client: Option<SnmpClient>,
}

impl SnmpHandler {
    pub fn new(ctx: HandlerContext, profile: DeviceProfile) -> Self {
        Self {
            ctx,
            profile,
            oids: HashMap::new(),
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut SnmpClient, UniconError> {
        let label = self.profile.label();
        self.client
            .as_mut()
            .ok_or_else(|| UniconError::NotConnected(label.into()))
    }

    fn oid(&self, name: &str) -> Result<Oid, UniconError> {
        let raw = self
            .oids
            .get(name)
            .ok_or_else(|| UniconError::Internal(format!("no OID registered for {name}")))?;
        Oid::from_str(raw)
            .map_err(|_| UniconError::InvalidConfig(format!("oidOverrides.{name}: invalid OID '{raw}'")))
    }

    async fn get_named(&mut self, names: &[&str]) -> Result<Map<String, Value>, UniconError> {
        let oids = names
            .iter()
            .map(|name| self.oid(name))
            .collect::<Result<Vec<_>, _>>()?;
        let varbinds = self.client()?.get(&oids).await?;
        let by_oid = varbinds_to_map(&varbinds);
        Ok(names
            .iter()
            .zip(&oids)
            .map(|(name, oid)| {
                let value = by_oid.get(&oid.to_string()).cloned().unwrap_or(Value::Null);
                (name.to_string(), value)
            })
            .collect())
    }

    async fn get(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        let p: OidsParams = params::parse(operation, params)?;
        let oids = p
            .oids
            .into_vec()
            .iter()
            .map(|s| Oid::from_str(s))
            .collect::<Result<Vec<_>, _>>()?;
        if oids.is_empty() {
            return Err(UniconError::params("oids must not be empty"));
        }
        let varbinds = self.client()?.get(&oids).await?;
        Ok(Value::Object(varbinds_to_map(&varbinds)))
    }

    async fn set(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: SetParams = params::parse("set", params)?;
        self.set_descriptors(&p.varbinds).await
    }

    async fn set_descriptors(&mut self, descriptors: &[SetDescriptor]) -> Result<Value, UniconError> {
        if descriptors.is_empty() {
            return Err(UniconError::params("varbinds must not be empty"));
        }
        let varbinds = descriptors
            .iter()
            .map(coerce_varbind)
            .collect::<Result<Vec<_>, _>>()?;
        let written = self.client()?.set(varbinds).await?;
        Ok(json!({
            "success": true,
            "varbinds": written
                .iter()
                .map(|vb| json!({
                    "oid": vb.oid.to_string(),
                    "type": vb.value.type_name(),
                    "value": vb.value.to_json(),
                }))
                .collect::<Vec<_>>(),
        }))
    }

    async fn get_table(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: TableParams = params::parse("getTable", params)?;
        let base = Oid::from_str(&p.base_oid)?;
        let rows = self.client()?.walk(&base, WALK_MAX_REPETITIONS).await?;
        debug!("Walked {} rows under {}", rows.len(), base);
        Ok(Value::Array(
            rows.iter()
                .map(|vb| json!({ "oid": vb.oid.to_string(), "value": vb.value.to_json() }))
                .collect(),
        ))
    }

    async fn read_snapshot(&mut self) -> Result<Value, UniconError> {
        let r = self
            .get_named(&[
                "essAirTemperature",
                "essRelativeHumidity",
                "essWindSpeed",
                "essWindDirection",
                "essPrecipitationRate",
                "essVisibility",
                "essSystemType",
            ])
            .await?;
        Ok(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "data": {
                "temperature": { "value": r["essAirTemperature"], "unit": "C", "precision": 0.1 },
                "humidity": { "value": r["essRelativeHumidity"], "unit": "%" },
                "windSpeed": { "value": r["essWindSpeed"], "unit": "m/s", "precision": 0.1 },
                "windDirection": { "value": r["essWindDirection"], "unit": "degrees" },
                "precipitation": { "value": r["essPrecipitationRate"], "unit": "mm/hour" },
                "visibility": { "value": r["essVisibility"], "unit": "meters" },
                "systemType": r["essSystemType"],
            }
        }))
    }

    async fn get_status(&mut self) -> Result<Value, UniconError> {
        let r = self
            .get_named(&[
                "vmsSignStatus",
                "vmsCurrentMessageNumber",
                "vmsCurrentMessageCRC",
                "vmsErrorStatus",
                "vmsSignBrightness",
                "vmsSystemType",
            ])
            .await?;
        Ok(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "data": {
                "signStatus": r["vmsSignStatus"],
                "currentMessageNumber": r["vmsCurrentMessageNumber"],
                "currentMessageCRC": r["vmsCurrentMessageCRC"],
                "errorStatus": r["vmsErrorStatus"],
                "brightness": r["vmsSignBrightness"],
                "systemType": r["vmsSystemType"],
            }
        }))
    }

    async fn set_message(&mut self, params: Value) -> Result<Value, UniconError> {
        let p: MessageParams = params::parse("setMessage", params)?;
        let indexed = |name: &str| -> Result<String, UniconError> {
            Ok(self.oid(name)?.child(p.message_number).to_string())
        };
        let mut writes = vec![
            SetDescriptor {
                oid: indexed("vmsMessageText")?,
                value_type: "octetstring".into(),
                value: json!(p.message_text),
            },
            SetDescriptor {
                oid: indexed("vmsMessageBeacon")?,
                value_type: "integer".into(),
                value: json!(p.beacon.unwrap_or(0)),
            },
        ];
        if let Some(pixel) = p.pixel_service {
            writes.push(SetDescriptor {
                oid: indexed("vmsMessagePixelService")?,
                value_type: "integer".into(),
                value: json!(pixel),
            });
        }
        self.set_descriptors(&writes).await?;
        info!(
            "VMS message {} set on {}",
            p.message_number, self.ctx.connection_id
        );
        Ok(json!({
            "messageNumber": p.message_number,
            "messageText": p.message_text,
            "beacon": p.beacon.unwrap_or(0),
            "pixelService": p.pixel_service,
        }))
    }
}

#[async_trait]
impl ProtocolHandler for SnmpHandler {
    async fn connect(&mut self) -> Result<Value, UniconError> {
        let config: SnmpConfig = self.ctx.parse_config()?;
        if config.host.trim().is_empty() {
            return Err(UniconError::InvalidConfig("host is required".into()));
        }
        let version = parse_version(&config.version)?;

        let mut oids: HashMap<String, String> = self
            .profile
            .default_oids()
            .into_iter()
            .map(|(name, oid)| (name.to_string(), oid))
            .collect();
        for (name, oid) in config.oid_overrides {
            Oid::from_str(&oid).map_err(|_| {
                UniconError::InvalidConfig(format!("oidOverrides.{name}: invalid OID '{oid}'"))
            })?;
            oids.insert(name, oid);
        }
        self.oids = oids;

        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        let mut client = SnmpClient::open(SnmpTarget {
            host: config.host.clone(),
            port: config.port,
            version,
            community: config.community,
            timeout,
            retries: config.retries,
        })
        .await?;

        // Hard ceiling on the probe, independent of the per-attempt timeout.
        let ceiling = timeout * (config.retries + 1) + Duration::from_secs(1);
        let probe = self.oid(self.profile.probe_key())?;
        let probed = tokio::time::timeout(ceiling, client.get(std::slice::from_ref(&probe)))
            .await
            .map_err(|_| UniconError::Timeout(format!("SNMP connect timeout to {}", config.host)))?;
        let sample = match probed {
            Ok(varbinds) => varbinds.first().map(|vb| vb.value.to_json()),
            // The agent answered; an error status still proves reachability.
            Err(UniconError::Remote { message, .. }) => {
                debug!("Probe of {} answered with {}", probe, message);
                None
            }
            Err(e) => return Err(e),
        };
        info!(
            "{} agent {}:{} reachable",
            self.profile.label(),
            config.host,
            config.port
        );
        self.client = Some(client);
        Ok(json!({
            "host": config.host,
            "port": config.port,
            "probeOid": probe.to_string(),
            "probeValue": sample,
        }))
    }

    async fn disconnect(&mut self) -> Result<(), UniconError> {
        self.client = None;
        Ok(())
    }

    async fn invoke(&mut self, operation: &str, params: Value) -> Result<Value, UniconError> {
        match (operation, self.profile) {
            ("get" | "bulkGet", _) => self.get(operation, params).await,
            ("set", _) => self.set(params).await,
            ("getTable", _) => self.get_table(params).await,
            ("readSnapshot", DeviceProfile::Ess) => self.read_snapshot().await,
            ("getStatus", DeviceProfile::Vms) => self.get_status().await,
            ("setMessage", DeviceProfile::Vms) => self.set_message(params).await,
            _ => Err(UniconError::UnknownOperation {
                protocol: self.ctx.protocol.to_string(),
                operation: operation.into(),
            }),
        }
    }
}
