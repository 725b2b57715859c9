use crate::error::{AppError, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound invocation: an operation name and its named arguments.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvocationRequest {
    pub operation: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

/// Uniform response wrapper returned for every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: EnvelopeStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl Envelope {
    pub fn success(result: Value) -> Self {
        Self {
            status: EnvelopeStatus::Success,
            result: Some(result),
            error: None,
            kind: None,
        }
    }

    pub fn failure(err: &AppError) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            result: None,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EnvelopeStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let value = serde_json::to_value(Envelope::success(json!("Hello, X!"))).unwrap();
        assert_eq!(
            value,
            json!({ "status": "success", "result": "Hello, X!", "error": null })
        );
    }

    #[test]
    fn test_failure_shape() {
        let env = Envelope::failure(&AppError::UnknownOperation("nope".into()));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["result"], Value::Null);
        assert_eq!(value["kind"], "UnknownOperation");
        assert_eq!(value["error"], "Unknown operation: nope");
    }

    #[test]
    fn test_request_arguments_default_to_empty() {
        let req: InvocationRequest = serde_json::from_value(json!({ "operation": "hello" })).unwrap();
        assert!(req.arguments.is_empty());
    }
}
