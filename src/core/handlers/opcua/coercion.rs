// src/core/handlers/opcua/coercion.rs

//! Turning loosely-typed JSON input into typed OPC UA variants.
//!
//! A write goes through three stages: the variable's declared shape is
//! resolved (and cached by the handler), the caller's value is checked
//! against that shape, and only then is each scalar coerced to the target
//! data type. Shape errors therefore never depend on the value's contents.

use super::types::DataType;
use crate::core::errors::UniconError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, TimeZone, Utc};
use opcua::types::{Array, ByteString, DataValue, Identifier, NodeId, UAString, Variant};
use serde_json::{Value, json};
use std::str::FromStr;

/// ValueRank: the variable holds a scalar.
pub const RANK_SCALAR: i32 = -1;
/// ValueRank: scalar or an array of any dimension.
pub const RANK_ANY: i32 = -2;
/// ValueRank: scalar or a one-dimensional array.
pub const RANK_SCALAR_OR_ONE_DIMENSION: i32 = -3;

/// The declared type and shape of a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    /// Built-in element type, when the declared type is a namespace-0 built-in.
    pub data_type: Option<DataType>,
    pub value_rank: i32,
    /// Declared dimension lengths; zero means unspecified.
    pub array_dimensions: Vec<u32>,
}

impl NodeMeta {
    pub fn scalar(data_type: Option<DataType>) -> Self {
        Self {
            data_type,
            value_rank: RANK_SCALAR,
            array_dimensions: Vec::new(),
        }
    }

    pub fn array(data_type: Option<DataType>, dimensions: Vec<u32>) -> Self {
        Self {
            data_type,
            value_rank: dimensions.len().max(1) as i32,
            array_dimensions: dimensions,
        }
    }

    /// Builds the metadata from the DataType, ValueRank and ArrayDimensions
    /// attribute reads, in that order. Unreadable attributes fall back to
    /// "unknown type, scalar, no fixed dimensions".
    pub fn from_attributes(values: &[DataValue]) -> Self {
        let good = |i: usize| {
            values
                .get(i)
                .filter(|dv| dv.status.is_none_or(|s| s.is_good()))
                .and_then(|dv| dv.value.as_ref())
        };

        let data_type = good(0).and_then(|v| match v {
            Variant::NodeId(id) if id.namespace == 0 => match &id.identifier {
                Identifier::Numeric(n) => DataType::from_id(*n),
                _ => None,
            },
            _ => None,
        });
        let value_rank = good(1)
            .and_then(|v| match v {
                Variant::Int32(rank) => Some(*rank),
                _ => None,
            })
            .unwrap_or(RANK_SCALAR);
        let array_dimensions = good(2)
            .map(|v| match v {
                Variant::Array(array) => array
                    .values
                    .iter()
                    .filter_map(|d| match d {
                        Variant::UInt32(d) => Some(*d),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();

        Self {
            data_type,
            value_rank,
            array_dimensions,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "dataType": self.data_type.map(DataType::name),
            "valueRank": self.value_rank,
            "arrayDimensions": self.array_dimensions,
        })
    }
}

/// Checks array-vs-scalar and fixed one-dimensional length.
pub fn validate_shape(value: &Value, meta: &NodeMeta) -> Result<(), UniconError> {
    let is_array = value.is_array();
    match meta.value_rank {
        RANK_SCALAR if is_array => Err(UniconError::ShapeMismatch(
            "BadTypeMismatch: scalar expected".into(),
        )),
        RANK_SCALAR | RANK_ANY | RANK_SCALAR_OR_ONE_DIMENSION => Ok(()),
        _ if !is_array => Err(UniconError::ShapeMismatch(
            "BadTypeMismatch: array expected".into(),
        )),
        _ => match (meta.array_dimensions.as_slice(), value.as_array()) {
            // Multi-dimensional shapes are passed through unchecked.
            ([expected], Some(items)) if *expected > 0 && items.len() != *expected as usize => {
                Err(UniconError::ShapeMismatch(format!(
                    "BadTypeMismatch: expected length {expected}"
                )))
            }
            _ => Ok(()),
        },
    }
}

/// Resolves a caller-supplied `dataType` (name or numeric id).
pub fn parse_data_type(raw: &Value) -> Result<Option<DataType>, UniconError> {
    let name = match raw {
        Value::Null => return Ok(None),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(UniconError::params(format!("dataType: unexpected {other}")));
        }
    };
    DataType::from_name(&name)
        .map(Some)
        .ok_or_else(|| UniconError::params(format!("dataType: unknown data type '{name}'")))
}

/// Builds a one-dimensional array variant of `element` values.
pub fn array_variant(element: DataType, values: Vec<Variant>) -> Variant {
    Variant::Array(Box::new(Array {
        value_type: element.scalar_type_id(),
        values,
        dimensions: None,
    }))
}

/// Coerces `value` to a variant. With a target type every scalar is converted
/// to it; without one the type is inferred from the value itself.
pub fn coerce_variant(value: &Value, target: Option<DataType>) -> Result<Variant, UniconError> {
    match (value, target) {
        (Value::Array(items), Some(dt)) => Ok(array_variant(
            dt,
            items
                .iter()
                .map(|item| coerce_scalar(item, dt))
                .collect::<Result<_, _>>()?,
        )),
        (Value::Array(items), None) => coerce_variant(value, Some(infer_element_type(items))),
        (_, Some(dt)) => coerce_scalar(value, dt),
        (_, None) => Ok(infer_scalar(value)),
    }
}

/// The element type an untyped JSON array is written as, from its first item.
pub fn infer_element_type(items: &[Value]) -> DataType {
    match items.first() {
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => DataType::Int32,
        Some(Value::Number(_)) => DataType::Double,
        Some(Value::Bool(_)) => DataType::Boolean,
        _ => DataType::String,
    }
}

fn infer_scalar(value: &Value) -> Variant {
    match value {
        Value::Bool(b) => Variant::Boolean(*b),
        Value::Number(n) => number_variant(n.as_i64(), n.as_f64()),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() && !s.trim().is_empty() => {
                number_variant(s.trim().parse::<i64>().ok(), Some(f))
            }
            _ => Variant::String(UAString::from(s.as_str())),
        },
        Value::Null => Variant::String(UAString::null()),
        other => Variant::String(UAString::from(other.to_string())),
    }
}

fn number_variant(integer: Option<i64>, float: Option<f64>) -> Variant {
    match integer.map(i32::try_from) {
        Some(Ok(i)) => Variant::Int32(i),
        _ => Variant::Double(float.unwrap_or(0.0)),
    }
}

fn mismatch(value: &Value, dt: DataType) -> UniconError {
    UniconError::TypeMismatch(format!("cannot convert {value} to {dt}"))
}

/// Parses a numeric input. Strings are parsed as numbers first; anything that
/// is not a finite number is rejected.
fn numeric(value: &Value, dt: DataType) -> Result<f64, UniconError> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    n.filter(|f| f.is_finite()).ok_or_else(|| mismatch(value, dt))
}

fn integer<T: TryFrom<i128>>(value: &Value, dt: DataType) -> Result<T, UniconError> {
    // Exact integers skip the float path so 64-bit values keep full precision.
    let whole: i128 = match value {
        Value::Number(n) if n.is_i64() => n.as_i64().map(i128::from).unwrap_or_default(),
        Value::Number(n) if n.is_u64() => n.as_u64().map(i128::from).unwrap_or_default(),
        Value::String(s) if s.trim().parse::<i128>().is_ok() => {
            s.trim().parse::<i128>().unwrap_or_default()
        }
        _ => numeric(value, dt)?.trunc() as i128,
    };
    T::try_from(whole).map_err(|_| {
        UniconError::TypeMismatch(format!("{whole} is out of range for {dt}"))
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn date_time(value: &Value, dt: DataType) -> Result<opcua::types::DateTime, UniconError> {
    let parsed: Option<DateTime<Utc>> = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    };
    parsed
        .map(opcua::types::DateTime::from)
        .ok_or_else(|| mismatch(value, dt))
}

/// Converts one JSON scalar to a scalar variant of `dt`.
pub fn coerce_scalar(value: &Value, dt: DataType) -> Result<Variant, UniconError> {
    Ok(match dt {
        DataType::Boolean => Variant::Boolean(truthy(value)),
        DataType::SByte => Variant::SByte(integer(value, dt)?),
        DataType::Byte => Variant::Byte(integer(value, dt)?),
        DataType::Int16 => Variant::Int16(integer(value, dt)?),
        DataType::UInt16 => Variant::UInt16(integer(value, dt)?),
        DataType::Int32 => Variant::Int32(integer(value, dt)?),
        DataType::UInt32 => Variant::UInt32(integer(value, dt)?),
        DataType::Int64 => Variant::Int64(integer(value, dt)?),
        DataType::UInt64 => Variant::UInt64(integer(value, dt)?),
        DataType::Float => Variant::Float(numeric(value, dt)? as f32),
        DataType::Double => Variant::Double(numeric(value, dt)?),
        DataType::String => Variant::String(match value {
            Value::Null => UAString::null(),
            Value::String(s) => UAString::from(s.as_str()),
            other => UAString::from(other.to_string()),
        }),
        DataType::DateTime => Variant::DateTime(Box::new(date_time(value, dt)?)),
        DataType::ByteString => Variant::ByteString(match value {
            Value::Null => ByteString::null(),
            Value::String(s) => {
                ByteString::from(BASE64.decode(s.trim()).map_err(|_| mismatch(value, dt))?)
            }
            _ => return Err(mismatch(value, dt)),
        }),
        DataType::NodeId => {
            let raw = value.as_str().ok_or_else(|| mismatch(value, dt))?;
            Variant::NodeId(Box::new(
                NodeId::from_str(raw.trim()).map_err(|_| mismatch(value, dt))?,
            ))
        }
        other => {
            return Err(UniconError::TypeMismatch(format!(
                "writing {other} values is not supported"
            )));
        }
    })
}
