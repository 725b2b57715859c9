//! Path router for the ad-hoc HTTP sub-server.
//!
//! Each request is routed by its first path segment to a handler script in
//! the routes directory, run as a subprocess, and its output normalized into
//! a response. Handler files are re-resolved on every request.

pub mod request;
pub mod resolve;
pub mod script;
pub mod server;

pub use request::{LazyBody, QueryValue, RouteRequest};
pub use resolve::{route_name, validate_segment, RouteResolver, DEFAULT_ROUTE};
pub use script::{normalize_output, HandlerFailure, HandlerResponse, ScriptRunner};
pub use server::{RouteServerManager, ServerInfo, ServerKind};

use crate::config::Config;
use crate::error::{AppError, Result};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;

/// Largest request body a handler is given.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const CORS_HEADERS: [(&str, &str); 3] = [
    ("access-control-allow-origin", "*"),
    (
        "access-control-allow-methods",
        "GET, POST, PUT, PATCH, DELETE, OPTIONS",
    ),
    ("access-control-allow-headers", "Content-Type, Authorization"),
];

#[derive(Debug, Clone)]
pub struct PathRouter {
    resolver: RouteResolver,
    runner: ScriptRunner,
}

impl PathRouter {
    pub fn new(resolver: RouteResolver, runner: ScriptRunner) -> Self {
        Self { resolver, runner }
    }

    /// Router over `routes_dir` using the configured interpreter and timeout.
    pub fn from_config(config: &Config, routes_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            RouteResolver::new(routes_dir, &config.route_extension),
            ScriptRunner::new(
                config.route_interpreter.clone(),
                Duration::from_secs(config.route_timeout_secs),
            ),
        )
    }

    pub fn routes_dir(&self) -> &Path {
        self.resolver.routes_dir()
    }

    /// An axum router sending every request through [`PathRouter::handle`].
    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(route_request)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(self))
    }

    /// Route one request. Never fails: faults become 404/500 responses.
    pub async fn handle(&self, request: Request) -> Response {
        let start = Instant::now();
        let (parts, body) = request.into_parts();
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();

        let mut response = if method == Method::OPTIONS {
            StatusCode::NO_CONTENT.into_response()
        } else {
            match self.resolver.resolve(method.as_str(), &path).await {
                Ok(script) => {
                    let request =
                        RouteRequest::new(&method, &parts.uri, &parts.headers, body, MAX_BODY_BYTES);
                    self.execute(&script, request).await
                }
                Err(_) => not_found(&path),
            }
        };

        apply_cors(&mut response);

        let status = response.status().as_u16();
        metrics::counter!("route_requests_total", "status" => status.to_string()).increment(1);
        tracing::info!(
            method = %method,
            path = %path,
            status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Route request handled"
        );

        response
    }

    async fn execute(&self, script: &Path, request: RouteRequest) -> Response {
        let payload = match request.to_json().await {
            Ok(payload) => payload,
            Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
        };

        tracing::debug!(handler = %script.display(), "Resolved route handler");

        match self.runner.run(script, self.routes_dir(), &payload).await {
            Ok(handler) => render(handler),
            Err(failure) => {
                tracing::warn!(
                    handler = %script.display(),
                    error = %failure.message,
                    "Route handler failed"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": failure.message, "trace": failure.trace })),
                )
                    .into_response()
            }
        }
    }
}

async fn route_request(State(router): State<Arc<PathRouter>>, request: Request) -> Response {
    router.handle(request).await
}

fn not_found(path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found", "path": path })),
    )
        .into_response()
}

fn render(handler: HandlerResponse) -> Response {
    let mut response = Response::new(Body::from(handler.body));
    *response.status_mut() = handler.status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(handler.content_type),
    );
    for (name, value) in handler.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::debug!(header = %name, "Dropping invalid handler header"),
        }
    }
    response
}

fn apply_cors(response: &mut Response) {
    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

/// Write a handler file for `endpoint`, atomically replacing any existing one.
///
/// Readers see either the previous file or the complete new one.
pub async fn write_handler(
    resolver: &RouteResolver,
    endpoint: &str,
    method: Option<&str>,
    code: &str,
) -> Result<PathBuf> {
    let name = endpoint.trim().trim_matches('/');
    let name = if name.is_empty() { DEFAULT_ROUTE } else { name };
    validate_segment(name)?;

    if let Some(method) = method {
        Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| AppError::InvalidArgument(format!("'{}' is not an HTTP method", method)))?;
    }

    tokio::fs::create_dir_all(resolver.routes_dir()).await?;

    let target = resolver.handler_path(name, method);
    let tmp = resolver
        .routes_dir()
        .join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, code).await?;
    if let Err(e) = tokio::fs::rename(&tmp, &target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    tracing::info!(handler = %target.display(), "Route handler written");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_handler_targets_method_file() {
        let dir = tempdir().unwrap();
        let resolver = RouteResolver::new(dir.path().join("routes"), "sh");

        let path = write_handler(&resolver, "/users", Some("POST"), "echo hi")
            .await
            .unwrap();
        assert!(path.ends_with("users.post.sh"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo hi");

        let root = write_handler(&resolver, "/", None, "echo root").await.unwrap();
        assert!(root.ends_with("index.sh"));
    }

    #[tokio::test]
    async fn test_write_handler_rejects_traversal() {
        let dir = tempdir().unwrap();
        let resolver = RouteResolver::new(dir.path().join("routes"), "sh");
        assert!(write_handler(&resolver, "../evil", None, "x").await.is_err());
        assert!(write_handler(&resolver, "a/b", None, "x").await.is_err());
        assert!(write_handler(&resolver, "ok", Some("NOT A METHOD"), "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_write_handler_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let resolver = RouteResolver::new(dir.path(), "sh");
        write_handler(&resolver, "a", None, "one").await.unwrap();
        write_handler(&resolver, "a", None, "two").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.sh"]);
    }
}
