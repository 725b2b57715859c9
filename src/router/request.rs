//! The request object handed to route handlers.

use crate::error::{AppError, Result};
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Uri};
use base64::Engine;
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Mutex, OnceLock};
use tokio::sync::OnceCell;

/// A query parameter: a single value, or every value when repeated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Many(Vec<String>),
}

impl QueryValue {
    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(first) => {
                *self = QueryValue::Many(vec![std::mem::take(first), value]);
            }
            QueryValue::Many(values) => values.push(value),
        }
    }
}

/// Request body read at most once, with derived views computed on first use.
pub struct LazyBody {
    source: Mutex<Option<Body>>,
    limit: usize,
    bytes: OnceCell<Bytes>,
    text: OnceLock<Option<String>>,
    json: OnceLock<Option<Value>>,
}

impl LazyBody {
    pub fn new(body: Body, limit: usize) -> Self {
        Self {
            source: Mutex::new(Some(body)),
            limit,
            bytes: OnceCell::new(),
            text: OnceLock::new(),
            json: OnceLock::new(),
        }
    }

    /// Raw body bytes.
    pub async fn bytes(&self) -> Result<&Bytes> {
        self.bytes
            .get_or_try_init(|| async {
                let body = self
                    .source
                    .lock()
                    .map_err(|_| AppError::CapabilityError("Request body lock poisoned".into()))?
                    .take();
                match body {
                    Some(body) => axum::body::to_bytes(body, self.limit).await.map_err(|e| {
                        AppError::ValidationError(format!("Failed to read request body: {}", e))
                    }),
                    None => Ok(Bytes::new()),
                }
            })
            .await
    }

    /// Body decoded as UTF-8, None when it is not valid UTF-8.
    pub async fn text(&self) -> Result<Option<&str>> {
        let bytes = self.bytes().await?;
        Ok(self
            .text
            .get_or_init(|| std::str::from_utf8(bytes).ok().map(str::to_string))
            .as_deref())
    }

    /// Best-effort JSON parse of the body, None when empty or malformed.
    pub async fn json(&self) -> Result<Option<&Value>> {
        let text = self.text().await?;
        Ok(self
            .json
            .get_or_init(|| {
                text.filter(|t| !t.trim().is_empty())
                    .and_then(|t| serde_json::from_str(t).ok())
            })
            .as_ref())
    }
}

pub struct RouteRequest {
    pub method: String,
    pub path: String,
    pub query: IndexMap<String, QueryValue>,
    pub headers: IndexMap<String, String>,
    pub body: LazyBody,
}

impl RouteRequest {
    pub fn new(method: &Method, uri: &Uri, headers: &HeaderMap, body: Body, limit: usize) -> Self {
        Self {
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            query: parse_query(uri.query().unwrap_or("")),
            headers: headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: LazyBody::new(body, limit),
        }
    }

    /// Serialized form written to the handler's stdin.
    ///
    /// `body` is the text body (or null), `json` its parsed form, and
    /// `body_base64` carries non-UTF-8 bodies.
    pub async fn to_json(&self) -> Result<Value> {
        let bytes = self.body.bytes().await?;
        let text = self.body.text().await?;
        let parsed = self.body.json().await?.cloned();
        let body_base64 = match text {
            Some(_) => Value::Null,
            None => json!(base64::engine::general_purpose::STANDARD.encode(bytes)),
        };

        Ok(json!({
            "method": self.method,
            "path": self.path,
            "query": self.query,
            "headers": self.headers,
            "body": text,
            "json": parsed,
            "body_base64": body_base64,
        }))
    }
}

/// Parse an `application/x-www-form-urlencoded` query string.
pub fn parse_query(query: &str) -> IndexMap<String, QueryValue> {
    let mut params: IndexMap<String, QueryValue> = IndexMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = decode_component(value);
        match params.get_mut(&key) {
            Some(existing) => existing.push(value),
            None => {
                params.insert(key, QueryValue::Single(value));
            }
        }
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
