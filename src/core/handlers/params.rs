// src/core/handlers/params.rs

//! Helpers for turning an operation's `params` map into typed arguments.

use crate::core::errors::UniconError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserializes `params` into `T`. A missing (`null`) params map is treated as
/// an empty object so all-default parameter structs work.
pub fn parse<T: DeserializeOwned>(operation: &str, params: Value) -> Result<T, UniconError> {
    let params = match params {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(params)
        .map_err(|e| UniconError::InvalidParams(format!("{operation}: {e}")))
}

/// Stringifies a JSON value the way a loosely-typed caller expects: strings
/// verbatim, everything else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Accepts either a single string or a list of strings.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Accepts a command either as one shell string or as an argv list.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Argv(Vec<String>),
}

impl CommandLine {
    pub fn into_argv(self) -> Vec<String> {
        match self {
            CommandLine::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            CommandLine::Argv(argv) => argv,
        }
    }
}
