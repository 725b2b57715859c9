//! Permissive argument binding.
//!
//! Declared parameters are looked up by name, defaults fill the gaps and
//! values are lightly coerced to their declared type tag. Arguments the
//! operation does not declare are dropped.

use crate::error::{AppError, Result};
use crate::registry::args::json_type_name;
use crate::registry::{BoundArgs, OperationDescriptor, ParamType};
use serde_json::{Map, Number, Value};

pub fn bind(descriptor: &OperationDescriptor, args: &Map<String, Value>) -> Result<BoundArgs> {
    let mut bound = Map::with_capacity(descriptor.parameters.len());

    for spec in &descriptor.parameters {
        let supplied = args.get(&spec.name).filter(|v| !v.is_null());
        let value = match (supplied, &spec.default) {
            (Some(value), _) => coerce(&spec.name, spec.kind, value)?,
            (None, Some(default)) => default.clone(),
            (None, None) if spec.required => {
                return Err(AppError::MissingArgument(spec.name.clone()))
            }
            (None, None) => continue,
        };
        bound.insert(spec.name.clone(), value);
    }

    let ignored: Vec<&str> = args
        .keys()
        .filter(|k| descriptor.parameter(k).is_none())
        .map(String::as_str)
        .collect();
    if !ignored.is_empty() {
        tracing::debug!(operation = %descriptor.name, ?ignored, "Ignoring undeclared arguments");
    }

    Ok(BoundArgs::new(bound))
}

fn coerce(name: &str, kind: ParamType, value: &Value) -> Result<Value> {
    let coerced = match (kind, value) {
        (ParamType::Any, v) => Some(v.clone()),

        (ParamType::Str, Value::String(_)) => Some(value.clone()),
        (ParamType::Str, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamType::Str, Value::Bool(b)) => Some(Value::String(b.to_string())),

        (ParamType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (ParamType::Int, Value::Number(n)) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| Value::from(f as i64)),
        (ParamType::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),

        (ParamType::Float, Value::Number(_)) => Some(value.clone()),
        (ParamType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),

        (ParamType::Bool, Value::Bool(_)) => Some(value.clone()),
        (ParamType::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },

        (ParamType::List, Value::Array(_)) => Some(value.clone()),
        (ParamType::Map, Value::Object(_)) => Some(value.clone()),

        (ParamType::StrOrList, Value::Array(items)) if items.iter().all(Value::is_string) => {
            Some(value.clone())
        }
        (ParamType::StrOrList, Value::String(s)) => Some(Value::Array(
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        )),

        _ => None,
    };

    coerced.ok_or_else(|| {
        AppError::InvalidArgument(format!(
            "'{}' expects {}, got {}",
            name,
            kind,
            json_type_name(value)
        ))
    })
}
