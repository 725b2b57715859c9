//! Integration tests for the invocation API and the path router.
//!
//! Every test runs against a scratch workspace with the hashing embedder, so
//! no model files are needed.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use ndarray::Array2;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use toolhub::{handlers, AppError, AppState, Config, Embedder, HashingEmbedder};
use tower::ServiceExt;

/// Helper to build the full API over a fresh workspace.
fn create_test_app() -> (TempDir, Arc<AppState>, Router) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::for_workspace(dir.path());
    let state = Arc::new(
        AppState::with_embedder(config, Arc::new(HashingEmbedder::new(256)))
            .expect("Failed to create AppState"),
    );
    let app = handlers::router(Arc::clone(&state));
    (dir, state, app)
}

/// Helper to make a JSON request to the router.
async fn json_request(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let req = match method {
        "GET" => Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
        "POST" => Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.unwrap_or(json!({})).to_string()))
            .unwrap(),
        _ => panic!("Unsupported method"),
    };

    let response = app.oneshot(req).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));

    (status, body)
}

async fn invoke(app: Router, operation: &str, arguments: Value) -> Value {
    let (status, body) = json_request(
        app,
        "POST",
        "/invoke",
        Some(json!({ "operation": operation, "arguments": arguments })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "invoke always answers 200");
    body
}

// ============================================================================
// Health Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_200() {
    let (_dir, _state, app) = create_test_app();
    let (status, body) = json_request(app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_after_index_build() {
    let (_dir, state, app) = create_test_app();
    let (status, body) = json_request(app, "GET", "/ready", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["operations"].as_u64().unwrap() as usize, state.registry.len());
}

/// Fails its first batch, then behaves like the hashing embedder.
struct FailsOnceEmbedder {
    inner: HashingEmbedder,
    failed: AtomicBool,
}

impl Embedder for FailsOnceEmbedder {
    fn model_id(&self) -> &str {
        "fails-once"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_batch(&self, texts: &[String]) -> toolhub::Result<Array2<f32>> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(AppError::ModelError("warming up".to_string()));
        }
        self.inner.embed_batch(texts)
    }
}

#[tokio::test]
async fn test_ready_after_refresh_through_dispatcher() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::for_workspace(dir.path());
    let embedder = FailsOnceEmbedder {
        inner: HashingEmbedder::new(128),
        failed: AtomicBool::new(false),
    };
    let state = Arc::new(AppState::with_embedder(config, Arc::new(embedder)).unwrap());
    let app = handlers::router(Arc::clone(&state));

    let (status, _) = json_request(app.clone(), "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let envelope = state
        .dispatcher
        .invoke("refresh_tool_embeddings", Map::new())
        .await;
    let envelope = serde_json::to_value(envelope).unwrap();
    assert_eq!(envelope["status"], "success", "{}", envelope);

    let (status, body) = json_request(app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["operations"].as_u64().unwrap() as usize, state.registry.len());
}

// ============================================================================
// Invocation Tests
// ============================================================================

#[tokio::test]
async fn test_invoke_hello() {
    let (_dir, _state, app) = create_test_app();
    let body = invoke(app, "hello", json!({ "name": "X" })).await;

    assert_eq!(body["status"], "success");
    assert_eq!(body["result"], "Hello, X!");
    assert!(body["error"].is_null());
    assert!(body.get("kind").is_none());
}

#[tokio::test]
async fn test_invoke_unknown_operation_is_an_error_envelope() {
    let (_dir, _state, app) = create_test_app();
    let body = invoke(app, "does_not_exist", json!({})).await;

    assert_eq!(body["status"], "error");
    assert_eq!(body["kind"], "UnknownOperation");
    assert!(body["result"].is_null());
}

#[tokio::test]
async fn test_invoke_missing_argument() {
    let (_dir, _state, app) = create_test_app();
    let body = invoke(app, "read_file", json!({})).await;

    assert_eq!(body["kind"], "MissingArgument");
    assert!(body["error"].as_str().unwrap().contains("filepath"));
}

#[tokio::test]
async fn test_invoke_malformed_body() {
    let (_dir, _state, app) = create_test_app();
    let (status, body) =
        json_request(app, "POST", "/invoke", Some(json!({ "arguments": {} }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(body["kind"], "ValidationError");
}

#[tokio::test]
async fn test_invoke_file_round_trip_stays_in_workspace() {
    let (dir, _state, app) = create_test_app();

    let created = invoke(
        app.clone(),
        "create_file",
        json!({ "filepath": "notes/todo.txt", "content": "buy milk" }),
    )
    .await;
    assert_eq!(created["status"], "success");
    assert!(dir.path().join("notes/todo.txt").exists());

    let read = invoke(app.clone(), "read_file", json!({ "filepath": "notes/todo.txt" })).await;
    assert_eq!(read["result"], "buy milk");

    let missing = invoke(app, "read_file", json!({ "filepath": "nope.txt" })).await;
    assert_eq!(missing["kind"], "CapabilityError");
}

#[tokio::test]
async fn test_invoke_storage_pagination() {
    let (_dir, _state, app) = create_test_app();
    for i in 1..=25 {
        let put = invoke(
            app.clone(),
            "put",
            json!({ "key": format!("a{:02}", i), "value": i.to_string() }),
        )
        .await;
        assert_eq!(put["status"], "success");
    }

    let first = invoke(app.clone(), "list", json!({ "prefix": "a", "limit": "10" })).await;
    assert_eq!(first["result"]["items"].as_array().unwrap().len(), 10);
    assert_eq!(first["result"]["has_more"], true);
    assert_eq!(first["result"]["next_start_after"], "a10");

    let last = invoke(
        app,
        "list",
        json!({ "prefix": "a", "limit": 10, "start_after": "a20" }),
    )
    .await;
    assert_eq!(last["result"]["items"].as_array().unwrap().len(), 5);
    assert_eq!(last["result"]["has_more"], false);
}

// ============================================================================
// Catalog Tests
// ============================================================================

#[tokio::test]
async fn test_tools_listing_and_lookup() {
    let (_dir, state, app) = create_test_app();

    let (status, body) = json_request(app.clone(), "GET", "/tools", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), state.registry.len());
    assert_eq!(body[0]["name"], "hello");

    let (status, body) = json_request(app.clone(), "GET", "/tools/create_file", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["category"], "file_system");
    assert_eq!(body["parameters"][0]["name"], "filepath");

    let (status, body) = json_request(app, "GET", "/tools/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
}

#[tokio::test]
async fn test_categories_endpoint() {
    let (_dir, state, app) = create_test_app();
    let (status, body) = json_request(app, "GET", "/categories", None).await;

    assert_eq!(status, StatusCode::OK);
    let categories = body.as_array().unwrap();
    assert_eq!(categories.len(), state.registry.categories().len());
    let names: Vec<&str> = categories.iter().map(|c| c["category"].as_str().unwrap()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[tokio::test]
async fn test_index_refresh() {
    let (_dir, state, app) = create_test_app();
    let (status, body) = json_request(app, "POST", "/index/refresh", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["indexed"].as_u64().unwrap() as usize, state.registry.len());
}

// ============================================================================
// Path Router Tests
// ============================================================================

#[cfg(unix)]
mod path_router {
    use super::*;
    use toolhub::router::PathRouter;

    fn routes_app(dir: &std::path::Path) -> Router {
        let config = Config::for_workspace(dir);
        PathRouter::from_config(&config, config.routes_dir.clone()).into_router()
    }

    fn write_route(dir: &std::path::Path, file: &str, script: &str) {
        let routes = dir.join("routes");
        std::fs::create_dir_all(&routes).unwrap();
        std::fs::write(routes.join(file), script).unwrap();
    }

    async fn send(app: Router, method: &str, uri: &str) -> axum::response::Response {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn test_method_specific_handler_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_route(dir.path(), "users.sh", "cat >/dev/null; echo any");
        write_route(
            dir.path(),
            "users.post.sh",
            r#"cat >/dev/null; echo '{"status": 201, "body": {"created": true}}'"#,
        );
        let app = routes_app(dir.path());

        let (status, body) = json_request(app.clone(), "POST", "/users", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["created"], true);

        let response = send(app, "GET", "/users/42").await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"any\n");
    }

    #[tokio::test]
    async fn test_traversal_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.sh"), "echo leaked").unwrap();
        let app = routes_app(dir.path());

        for uri in ["/..%2Fsecret", "/%2e%2e", "/a..b"] {
            let response = send(app.clone(), "GET", uri).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_options_preflight_has_cors_headers() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes_app(dir.path());
        let response = send(app, "OPTIONS", "/anything").await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );
    }

    #[tokio::test]
    async fn test_failing_handler_returns_trace() {
        let dir = tempfile::tempdir().unwrap();
        write_route(dir.path(), "boom.sh", "cat >/dev/null; echo 'it broke' >&2; exit 1");
        let app = routes_app(dir.path());

        let (status, body) = json_request(app, "GET", "/boom", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["trace"].as_str().unwrap().contains("it broke"));
    }

    #[tokio::test]
    async fn test_generated_endpoint_is_served_by_route_server() {
        let (dir, _state, app) = create_test_app();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let generated = invoke(
            app.clone(),
            "generate_http_server_endpoint",
            json!({ "endpoint": "ping", "code": "cat >/dev/null; echo pong" }),
        )
        .await;
        assert_eq!(generated["status"], "success");
        assert!(dir.path().join("routes/ping.sh").exists());

        let started = invoke(app.clone(), "start_http_server", json!({ "port": port })).await;
        assert_eq!(started["status"], "success", "{}", started);

        let fetched = invoke(
            app.clone(),
            "fetch",
            json!({ "url": format!("http://127.0.0.1:{}/ping", port) }),
        )
        .await;
        assert_eq!(fetched["result"]["status"], 200);
        assert_eq!(fetched["result"]["content"], "pong\n");

        let stopped = invoke(app, "stop_http_server", json!({ "port": port })).await;
        assert_eq!(stopped["status"], "success");
    }
}
