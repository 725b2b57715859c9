//! Arguments after binding, with typed accessors for capabilities.

use crate::error::{AppError, Result};
use serde_json::{Map, Value};

/// Arguments bound onto an operation's declared parameters.
///
/// Only declared parameters survive binding; defaults are already filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    values: Map<String, Value>,
}

impl BoundArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.opt_str(name)?
            .ok_or_else(|| AppError::MissingArgument(name.to_string()))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(type_mismatch(name, "str", other)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        self.opt_int(name)?
            .ok_or_else(|| AppError::MissingArgument(name.to_string()))
    }

    pub fn opt_int(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| AppError::InvalidArgument(format!("'{}' must be an integer", name))),
            Some(other) => Err(type_mismatch(name, "int", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            None => Err(AppError::MissingArgument(name.to_string())),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(type_mismatch(name, "bool", other)),
        }
    }

    /// Strings from a list parameter, or from a single string for `str|list`.
    pub fn str_list(&self, name: &str) -> Result<Vec<String>> {
        match self.get(name) {
            None => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Ok(other.to_string()),
                })
                .collect(),
            Some(other) => Err(type_mismatch(name, "list", other)),
        }
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }
}

fn type_mismatch(name: &str, expected: &str, got: &Value) -> AppError {
    AppError::InvalidArgument(format!(
        "'{}' must be of type {}, got {}",
        name,
        expected,
        json_type_name(got)
    ))
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
