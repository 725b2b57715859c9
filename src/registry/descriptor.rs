//! Operation metadata: what a capability is called, what it does and what it takes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Declared type tag of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "list")]
    List,
    #[serde(rename = "dict")]
    Map,
    /// A single string or a list of strings.
    #[serde(rename = "str|list")]
    StrOrList,
    #[serde(rename = "any")]
    Any,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ParamType::Str => "str",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::List => "list",
            ParamType::Map => "dict",
            ParamType::StrOrList => "str|list",
            ParamType::Any => "any",
        };
        f.write_str(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    pub fn required(name: &str, kind: ParamType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, kind: ParamType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn with_default(name: &str, kind: ParamType, default: Value) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: Some(default),
        }
    }
}

/// Registered metadata describing one operation.
///
/// `examples` and `keywords` are search hints only; they never affect dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    pub category: String,
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl OperationDescriptor {
    pub fn new(name: &str, description: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            parameters: Vec::new(),
            examples: Vec::new(),
            keywords: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn examples(mut self, examples: &[&str]) -> Self {
        self.examples = examples.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Parameter names in declaration order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }
}
