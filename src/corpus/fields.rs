use serde_json::{Map, Value};

use super::CorpusError;

pub(super) fn parse_object(origin: &str, raw: &str) -> Result<Map<String, Value>, CorpusError> {
    let value = serde_json::from_str::<Value>(raw).map_err(|err| CorpusError::InvalidJson {
        origin: origin.to_string(),
        reason: err.to_string(),
    })?;

    match value {
        Value::Object(map) => Ok(map),
        other => Err(CorpusError::InvalidJson {
            origin: origin.to_string(),
            reason: format!("expected a json object, found {}", value_kind(&other)),
        }),
    }
}

pub(super) fn required_string(
    origin: &str,
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<String, CorpusError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(CorpusError::MissingField {
            origin: origin.to_string(),
            field,
        }),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(malformed(origin, field, other)),
    }
}

pub(super) fn optional_string(
    origin: &str,
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<String, CorpusError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(malformed(origin, field, other)),
    }
}

/// Codes may be listed as strings or bare numbers; blank entries are dropped.
pub(super) fn optional_code_list(
    origin: &str,
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<String>, CorpusError> {
    let items = match object.get(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => return Err(malformed(origin, field, other)),
    };

    let mut codes = Vec::<String>::with_capacity(items.len());
    for item in items {
        let code = match item {
            Value::String(value) => value.trim().to_string(),
            Value::Number(value) => value.to_string(),
            other => return Err(malformed(origin, field, other)),
        };
        if !code.is_empty() {
            codes.push(code);
        }
    }
    Ok(codes)
}

fn malformed(origin: &str, field: &'static str, value: &Value) -> CorpusError {
    CorpusError::MalformedValue {
        origin: origin.to_string(),
        field,
        reason: format!("unexpected {}", value_kind(value)),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
