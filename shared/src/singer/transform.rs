//! Schema-driven record coercion, in the spirit of the Singer transformer:
//! values are checked against the JSON-schema `type` of each property,
//! lenient conversions are applied, and properties the schema does not
//! describe are dropped.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("Field `{path}` does not match schema type {expected}: {value}")]
    TypeMismatch {
        path: String,
        expected: String,
        value: String,
    },
    #[error("Record is not a JSON object")]
    NotAnObject,
}

pub fn transform(record: &Map<String, Value>, schema: &Value) -> Result<Map<String, Value>, TransformError> {
    match transform_value(&Value::Object(record.clone()), schema, "")? {
        Value::Object(map) => Ok(map),
        _ => Err(TransformError::NotAnObject),
    }
}

fn schema_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => vec![],
    }
}

fn transform_value(value: &Value, schema: &Value, path: &str) -> Result<Value, TransformError> {
    let types = schema_types(schema);
    if types.is_empty() {
        return Ok(value.clone());
    }

    if value.is_null() {
        return if types.contains(&"null") {
            Ok(Value::Null)
        } else {
            Err(mismatch(path, &types, value))
        };
    }

    let is_datetime = schema.get("format").and_then(Value::as_str) == Some("date-time");

    for ty in types.iter().filter(|t| **t != "null") {
        let converted = match *ty {
            "string" if is_datetime => to_datetime_string(value),
            "string" => to_string(value),
            "integer" => to_integer(value),
            "number" => to_number(value),
            "boolean" => to_boolean(value),
            "object" => match value {
                Value::Object(map) => Some(transform_object(map, schema, path)?),
                _ => None,
            },
            "array" => match value {
                Value::Array(items) => Some(transform_array(items, schema, path)?),
                _ => None,
            },
            _ => None,
        };
        if let Some(converted) = converted {
            return Ok(converted);
        }
    }

    Err(mismatch(path, &types, value))
}

fn transform_object(map: &Map<String, Value>, schema: &Value, path: &str) -> Result<Value, TransformError> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(Value::Object(map.clone()));
    };

    let mut out = Map::new();
    for (name, value) in map {
        if let Some(property_schema) = properties.get(name) {
            let child = child_path(path, name);
            out.insert(name.clone(), transform_value(value, property_schema, &child)?);
        }
    }
    Ok(Value::Object(out))
}

fn transform_array(items: &[Value], schema: &Value, path: &str) -> Result<Value, TransformError> {
    let Some(item_schema) = schema.get("items") else {
        return Ok(Value::Array(items.to_vec()));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| transform_value(item, item_schema, &format!("{}[{}]", path, i)))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn mismatch(path: &str, types: &[&str], value: &Value) -> TransformError {
    TransformError::TypeMismatch {
        path: if path.is_empty() { "<root>".to_string() } else { path.to_string() },
        expected: types.join("|"),
        value: value.to_string(),
    }
}

/// Integers in `date-time` fields are millisecond epochs.
fn to_datetime_string(value: &Value) -> Option<Value> {
    let dt = match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::<Utc>::from_timestamp_millis(millis)?
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc),
        _ => return None,
    };
    Some(Value::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true)))
}

fn to_string(value: &Value) -> Option<Value> {
    match value {
        Value::String(_) => Some(value.clone()),
        Value::Number(n) => Some(Value::String(n.to_string())),
        Value::Bool(b) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

fn to_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => {
            let f = n.as_f64()?;
            (f.fract() == 0.0).then(|| Value::from(f as i64))
        }
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn to_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn to_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}
