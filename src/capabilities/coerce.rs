//! Coerce backend-chosen arguments to declared parameter types.
//!
//! Reasoning backends routinely hand back `"3"` for a number or `"true"` for a
//! boolean. Values are coerced per parameter; anything that cannot be made to
//! fit is a `CoercionError` for that invocation only.

use serde_json::{Map, Value};

use crate::capabilities::capability::{Arguments, ParamType, ParameterSchema};
use crate::error::CoercionError;

pub fn coerce_arguments(schema: &ParameterSchema, raw: &Value) -> Result<Arguments, CoercionError> {
    let mut input = match raw {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        // Some backends send the arguments object as a JSON string.
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(CoercionError::NotAnObject {
                    found: type_name(raw).to_string(),
                });
            }
        },
        other => {
            return Err(CoercionError::NotAnObject {
                found: type_name(other).to_string(),
            });
        }
    };

    let mut coerced = Map::new();
    for param in schema.iter() {
        match input.remove(&param.name) {
            None | Some(Value::Null) if param.required => {
                return Err(CoercionError::MissingArgument {
                    name: param.name.clone(),
                });
            }
            None | Some(Value::Null) => {}
            Some(value) => {
                let value = coerce_value(&param.name, param.kind, value)?;
                coerced.insert(param.name.clone(), value);
            }
        }
    }

    for unknown in input.keys() {
        tracing::debug!(argument = %unknown, "Dropping undeclared argument");
    }

    Ok(coerced)
}

fn coerce_value(name: &str, kind: ParamType, value: Value) -> Result<Value, CoercionError> {
    let mismatch = |value: &Value| CoercionError::InvalidType {
        name: name.to_string(),
        expected: kind.to_string(),
        found: type_name(value).to_string(),
    };

    match kind {
        ParamType::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(&other)),
        },
        ParamType::Integer => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&f) => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(mismatch(&value)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        ParamType::Number => match &value {
            Value::Number(_) => Ok(value),
            Value::String(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(Value::from(i));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| mismatch(&value))
            }
            _ => Err(mismatch(&value)),
        },
        ParamType::Boolean => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
        ParamType::Array => match &value {
            Value::Array(_) => Ok(value),
            Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
                Ok(parsed @ Value::Array(_)) => Ok(parsed),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
        ParamType::Object => match &value {
            Value::Object(_) => Ok(value),
            Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
                Ok(parsed @ Value::Object(_)) => Ok(parsed),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
