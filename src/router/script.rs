//! Running a handler script and turning its output into a response.

use crate::process::{self, ProcessOutput, ProcessSpec};
use axum::body::Bytes;
use axum::http::StatusCode;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Lines of stderr included in a failure trace.
const TRACE_LINES: usize = 20;

/// What a handler produced, before CORS and framing are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HandlerResponse {
    fn new(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

/// Executes handler files with a configured interpreter.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    interpreter: String,
    timeout: Duration,
}

/// A handler that did not finish cleanly.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub message: String,
    pub trace: String,
}

impl ScriptRunner {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    /// Run `script` with `request` on stdin, from inside `routes_dir`.
    ///
    /// The child sees a cleared environment apart from `PATH`, `HOME`, locale
    /// and `ROUTE_METHOD` / `ROUTE_PATH`.
    pub async fn run(
        &self,
        script: &Path,
        routes_dir: &Path,
        request: &Value,
    ) -> std::result::Result<HandlerResponse, HandlerFailure> {
        let method = request["method"].as_str().unwrap_or("GET").to_string();
        let path = request["path"].as_str().unwrap_or("/").to_string();
        let input = serde_json::to_vec(request).map_err(|e| HandlerFailure {
            message: format!("Failed to encode request: {}", e),
            trace: String::new(),
        })?;

        let spec = ProcessSpec::new(self.interpreter.clone(), self.timeout)
            .arg(script.to_string_lossy())
            .cwd(routes_dir)
            .clear_env()
            .env("ROUTE_METHOD", method)
            .env("ROUTE_PATH", path)
            .stdin(input);

        let output = process::run(spec).await.map_err(|e| HandlerFailure {
            message: e.to_string(),
            trace: String::new(),
        })?;

        if !output.success() {
            return Err(HandlerFailure {
                message: format!(
                    "Handler {} exited with {}",
                    script.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
                    exit_label(&output)
                ),
                trace: output.stderr_tail(TRACE_LINES),
            });
        }

        Ok(normalize_output(output.stdout))
    }
}

fn exit_label(output: &ProcessOutput) -> String {
    match output.exit_code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Map handler stdout onto (status, content type, headers, body).
///
/// - empty → 200 empty `text/plain`
/// - JSON object with an integer `status` and only `status`/`body`/`headers`
///   keys → that response, `body` rendered by the same rules
/// - any other JSON → `application/json`
/// - UTF-8 text → `text/plain`
/// - anything else → `application/octet-stream` unchanged
pub fn normalize_output(stdout: Vec<u8>) -> HandlerResponse {
    if stdout.iter().all(|b| b.is_ascii_whitespace()) {
        return HandlerResponse::new(StatusCode::OK, "text/plain; charset=utf-8", Bytes::new());
    }

    let Ok(text) = String::from_utf8(stdout.clone()) else {
        return HandlerResponse::new(StatusCode::OK, "application/octet-stream", stdout);
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(value) => explicit_response(&value)
            .unwrap_or_else(|| render_value(StatusCode::OK, &value)),
        Err(_) => HandlerResponse::new(StatusCode::OK, "text/plain; charset=utf-8", text),
    }
}

fn explicit_response(value: &Value) -> Option<HandlerResponse> {
    let obj = value.as_object()?;
    if !obj
        .keys()
        .all(|k| matches!(k.as_str(), "status" | "body" | "headers"))
    {
        return None;
    }
    let status = obj
        .get("status")?
        .as_u64()
        .and_then(|s| u16::try_from(s).ok())
        .and_then(|s| StatusCode::from_u16(s).ok())?;

    let mut response = match obj.get("body") {
        None | Some(Value::Null) => {
            HandlerResponse::new(status, "text/plain; charset=utf-8", Bytes::new())
        }
        Some(Value::String(s)) => {
            HandlerResponse::new(status, "text/plain; charset=utf-8", s.clone())
        }
        Some(other) => render_value(status, other),
    };

    if let Some(Value::Object(headers)) = obj.get("headers") {
        response.headers = headers
            .iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect();
    }

    Some(response)
}

fn render_value(status: StatusCode, value: &Value) -> HandlerResponse {
    HandlerResponse::new(status, "application/json", value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_output_is_empty_text() {
        let r = normalize_output(b"\n".to_vec());
        assert_eq!(r.status, StatusCode::OK);
        assert!(r.body.is_empty());
        assert!(r.content_type.starts_with("text/plain"));
    }

    #[test]
    fn test_json_output_is_marked_json() {
        let r = normalize_output(br#"{"users": [1, 2]}"#.to_vec());
        assert_eq!(r.content_type, "application/json");
        assert_eq!(r.body, Bytes::from(r#"{"users":[1,2]}"#));
    }

    #[test]
    fn test_explicit_response_triple() {
        let r = normalize_output(
            br#"{"status": 201, "body": {"id": 7}, "headers": {"X-Id": "7"}}"#.to_vec(),
        );
        assert_eq!(r.status, StatusCode::CREATED);
        assert_eq!(r.content_type, "application/json");
        assert_eq!(r.body, Bytes::from(r#"{"id":7}"#));
        assert_eq!(r.headers, vec![("X-Id".to_string(), "7".to_string())]);
    }

    #[test]
    fn test_object_with_other_keys_is_plain_json() {
        let r = normalize_output(br#"{"status": 201, "name": "x"}"#.to_vec());
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.content_type, "application/json");
    }

    #[test]
    fn test_text_and_bytes() {
        let r = normalize_output(b"hello".to_vec());
        assert_eq!(r.body, Bytes::from("hello"));
        assert!(r.content_type.starts_with("text/plain"));

        let r = normalize_output(vec![0x89, b'P', b'N', b'G']);
        assert_eq!(r.content_type, "application/octet-stream");
        assert_eq!(r.body.len(), 4);
    }
}
