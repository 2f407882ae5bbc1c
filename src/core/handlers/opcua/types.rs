// src/core/handlers/opcua/types.rs

//! Built-in data type names and the JSON rendering of values read from a
//! server.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use opcua::types::{
    DataValue, NodeClass, ReferenceDescription, StatusCode, Variant, VariantScalarTypeId,
};
use serde_json::{Value, json};
use std::fmt;

/// The built-in data types, in namespace-0 id order starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    DateTime,
    Guid,
    ByteString,
    XmlElement,
    NodeId,
    ExpandedNodeId,
    StatusCode,
    QualifiedName,
    LocalizedText,
    ExtensionObject,
    DataValue,
    Variant,
    DiagnosticInfo,
}

const DATA_TYPES: [DataType; 25] = [
    DataType::Boolean,
    DataType::SByte,
    DataType::Byte,
    DataType::Int16,
    DataType::UInt16,
    DataType::Int32,
    DataType::UInt32,
    DataType::Int64,
    DataType::UInt64,
    DataType::Float,
    DataType::Double,
    DataType::String,
    DataType::DateTime,
    DataType::Guid,
    DataType::ByteString,
    DataType::XmlElement,
    DataType::NodeId,
    DataType::ExpandedNodeId,
    DataType::StatusCode,
    DataType::QualifiedName,
    DataType::LocalizedText,
    DataType::ExtensionObject,
    DataType::DataValue,
    DataType::Variant,
    DataType::DiagnosticInfo,
];

impl DataType {
    pub fn id(self) -> u32 {
        DATA_TYPES
            .iter()
            .position(|t| *t == self)
            .map(|i| i as u32 + 1)
            .unwrap_or(0)
    }

    pub fn from_id(id: u32) -> Option<Self> {
        DATA_TYPES.get((id as usize).checked_sub(1)?).copied()
    }

    /// Resolves a type name (`Int32`, `double`, ...) or a numeric id string.
    pub fn from_name(name: &str) -> Option<Self> {
        if let Ok(id) = name.trim().parse::<u32>() {
            return Self::from_id(id);
        }
        DATA_TYPES
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(name.trim()))
            .copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Boolean => "Boolean",
            DataType::SByte => "SByte",
            DataType::Byte => "Byte",
            DataType::Int16 => "Int16",
            DataType::UInt16 => "UInt16",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Int64 => "Int64",
            DataType::UInt64 => "UInt64",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::String => "String",
            DataType::DateTime => "DateTime",
            DataType::Guid => "Guid",
            DataType::ByteString => "ByteString",
            DataType::XmlElement => "XmlElement",
            DataType::NodeId => "NodeId",
            DataType::ExpandedNodeId => "ExpandedNodeId",
            DataType::StatusCode => "StatusCode",
            DataType::QualifiedName => "QualifiedName",
            DataType::LocalizedText => "LocalizedText",
            DataType::ExtensionObject => "ExtensionObject",
            DataType::DataValue => "DataValue",
            DataType::Variant => "Variant",
            DataType::DiagnosticInfo => "DiagnosticInfo",
        }
    }

    /// The element type tag used for arrays of this type.
    pub fn scalar_type_id(self) -> VariantScalarTypeId {
        match self {
            DataType::Boolean => VariantScalarTypeId::Boolean,
            DataType::SByte => VariantScalarTypeId::SByte,
            DataType::Byte => VariantScalarTypeId::Byte,
            DataType::Int16 => VariantScalarTypeId::Int16,
            DataType::UInt16 => VariantScalarTypeId::UInt16,
            DataType::Int32 => VariantScalarTypeId::Int32,
            DataType::UInt32 => VariantScalarTypeId::UInt32,
            DataType::Int64 => VariantScalarTypeId::Int64,
            DataType::UInt64 => VariantScalarTypeId::UInt64,
            DataType::Float => VariantScalarTypeId::Float,
            DataType::Double => VariantScalarTypeId::Double,
            DataType::String => VariantScalarTypeId::String,
            DataType::DateTime => VariantScalarTypeId::DateTime,
            DataType::Guid => VariantScalarTypeId::Guid,
            DataType::ByteString => VariantScalarTypeId::ByteString,
            DataType::XmlElement => VariantScalarTypeId::XmlElement,
            DataType::NodeId => VariantScalarTypeId::NodeId,
            DataType::ExpandedNodeId => VariantScalarTypeId::ExpandedNodeId,
            DataType::StatusCode => VariantScalarTypeId::StatusCode,
            DataType::QualifiedName => VariantScalarTypeId::QualifiedName,
            DataType::LocalizedText => VariantScalarTypeId::LocalizedText,
            DataType::ExtensionObject => VariantScalarTypeId::ExtensionObject,
            DataType::DataValue => VariantScalarTypeId::DataValue,
            DataType::Variant => VariantScalarTypeId::Variant,
            DataType::DiagnosticInfo => VariantScalarTypeId::DiagnosticInfo,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The built-in type a variant carries; for arrays, the element type.
pub fn variant_data_type(value: &Variant) -> Option<DataType> {
    Some(match value {
        Variant::Boolean(_) => DataType::Boolean,
        Variant::SByte(_) => DataType::SByte,
        Variant::Byte(_) => DataType::Byte,
        Variant::Int16(_) => DataType::Int16,
        Variant::UInt16(_) => DataType::UInt16,
        Variant::Int32(_) => DataType::Int32,
        Variant::UInt32(_) => DataType::UInt32,
        Variant::Int64(_) => DataType::Int64,
        Variant::UInt64(_) => DataType::UInt64,
        Variant::Float(_) => DataType::Float,
        Variant::Double(_) => DataType::Double,
        Variant::String(_) => DataType::String,
        Variant::DateTime(_) => DataType::DateTime,
        Variant::Guid(_) => DataType::Guid,
        Variant::ByteString(_) => DataType::ByteString,
        Variant::NodeId(_) => DataType::NodeId,
        Variant::ExpandedNodeId(_) => DataType::ExpandedNodeId,
        Variant::StatusCode(_) => DataType::StatusCode,
        Variant::QualifiedName(_) => DataType::QualifiedName,
        Variant::LocalizedText(_) => DataType::LocalizedText,
        Variant::Array(array) => return array.values.first().and_then(variant_data_type),
        _ => return None,
    })
}

pub fn variant_to_json(value: &Variant) -> Value {
    match value {
        Variant::Empty => Value::Null,
        Variant::Boolean(v) => json!(v),
        Variant::SByte(v) => json!(v),
        Variant::Byte(v) => json!(v),
        Variant::Int16(v) => json!(v),
        Variant::UInt16(v) => json!(v),
        Variant::Int32(v) => json!(v),
        Variant::UInt32(v) => json!(v),
        Variant::Int64(v) => json!(v),
        Variant::UInt64(v) => json!(v),
        Variant::Float(v) => json!(v),
        Variant::Double(v) => json!(v),
        Variant::String(v) => json!(v.value()),
        Variant::DateTime(v) => json!(v.as_chrono().to_rfc3339()),
        Variant::Guid(v) => json!(v.to_string()),
        Variant::ByteString(v) => json!(v.value.as_ref().map(|b| BASE64.encode(b))),
        Variant::NodeId(v) => json!(v.to_string()),
        Variant::ExpandedNodeId(v) => json!(v.to_string()),
        Variant::StatusCode(v) => json!(v.sub_code().name()),
        Variant::QualifiedName(v) => json!(format!("{}:{}", v.namespace_index, v.name.as_ref())),
        Variant::LocalizedText(v) => {
            json!({ "locale": v.locale.as_ref(), "text": v.text.as_ref() })
        }
        Variant::Variant(inner) => variant_to_json(inner),
        Variant::DataValue(inner) => data_value_to_json(inner),
        Variant::Array(array) => Value::Array(array.values.iter().map(variant_to_json).collect()),
        other => json!(format!("{other:?}")),
    }
}

/// The status of a read result; an absent status means Good.
pub fn status_of(value: &DataValue) -> StatusCode {
    value.status.unwrap_or(StatusCode::Good)
}

pub fn data_value_to_json(value: &DataValue) -> Value {
    let stamp =
        |t: &Option<opcua::types::DateTime>| t.as_ref().map(|t| t.as_chrono().to_rfc3339());
    json!({
        "value": value.value.as_ref().map(variant_to_json).unwrap_or(Value::Null),
        "dataType": value.value.as_ref().and_then(variant_data_type).map(DataType::name),
        "statusCode": status_of(value).sub_code().name(),
        "sourceTimestamp": stamp(&value.source_timestamp),
        "serverTimestamp": stamp(&value.server_timestamp),
    })
}

fn node_class_name(class: &NodeClass) -> &'static str {
    match class {
        NodeClass::Object => "Object",
        NodeClass::Variable => "Variable",
        NodeClass::Method => "Method",
        NodeClass::ObjectType => "ObjectType",
        NodeClass::VariableType => "VariableType",
        NodeClass::ReferenceType => "ReferenceType",
        NodeClass::DataType => "DataType",
        NodeClass::View => "View",
        _ => "Unspecified",
    }
}

pub fn reference_to_json(reference: &ReferenceDescription) -> Value {
    json!({
        "nodeId": reference.node_id.node_id.to_string(),
        "browseName": format!(
            "{}:{}",
            reference.browse_name.namespace_index,
            reference.browse_name.name.as_ref()
        ),
        "displayName": reference.display_name.text.as_ref(),
        "nodeClass": node_class_name(&reference.node_class),
        "referenceTypeId": reference.reference_type_id.to_string(),
        "isForward": reference.is_forward,
        "typeDefinition": reference.type_definition.node_id.to_string(),
    })
}
