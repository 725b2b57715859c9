//! Jupyter server capabilities over its REST API (`{JUPYTER_URL}/api/...`).

use super::{response_json, CapabilityContext, OperationSet};
use crate::error::{AppError, Result};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;

/// Default wait for an execution's results, in seconds.
const EXECUTION_TIMEOUT_SECS: i64 = 30;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Characters escaped in a contents path; `/` separates segments and stays.
const CONTENTS_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotebookOp {
    ListAvailableKernels,
    StartKernel,
    ExecuteCode,
    GetKernelStatus,
    InterruptKernel,
    RestartKernel,
    ShutdownKernel,
    ListRunningKernels,
    CreateNotebookWithCode,
    ExecuteCodeWithResults,
    ExecuteNotebookCells,
}

#[async_trait]
impl OperationSet for NotebookOp {
    const ALL: &'static [Self] = &[
        NotebookOp::ListAvailableKernels,
        NotebookOp::StartKernel,
        NotebookOp::ExecuteCode,
        NotebookOp::GetKernelStatus,
        NotebookOp::InterruptKernel,
        NotebookOp::RestartKernel,
        NotebookOp::ShutdownKernel,
        NotebookOp::ListRunningKernels,
        NotebookOp::CreateNotebookWithCode,
        NotebookOp::ExecuteCodeWithResults,
        NotebookOp::ExecuteNotebookCells,
    ];

    fn describe(self) -> OperationDescriptor {
        let cat = "jupyter";
        let kernel_id = || ParameterSpec::required("kernel_id", ParamType::Str);
        match self {
            NotebookOp::ListAvailableKernels => OperationDescriptor::new(
                "list_available_kernels",
                "List the kernel specs the Jupyter server can launch",
                cat,
            )
            .examples(&["which languages can the notebook run", "available kernel types"])
            .keywords(&["kernelspecs", "jupyter", "kernels", "languages"]),
            NotebookOp::StartKernel => OperationDescriptor::new(
                "start_kernel",
                "Start a new Jupyter kernel for interactive code execution",
                cat,
            )
            .param(ParameterSpec::with_default("kernel_name", ParamType::Str, json!("python3")))
            .param(ParameterSpec::with_default("path", ParamType::Str, json!("")))
            .examples(&[
                "start Python environment",
                "begin data analysis",
                "create notebook session",
                "interactive computing",
            ])
            .keywords(&["jupyter", "kernel", "notebook", "interactive", "python"]),
            NotebookOp::ExecuteCode => OperationDescriptor::new(
                "execute_code",
                "Execute code in a running Jupyter kernel",
                cat,
            )
            .param(kernel_id())
            .param(ParameterSpec::required("code", ParamType::Str))
            .param(ParameterSpec::with_default("silent", ParamType::Bool, json!(false)))
            .examples(&[
                "run analysis code",
                "execute notebook cell",
                "interactive computing",
                "data processing",
            ])
            .keywords(&["execute", "run", "code", "cell", "jupyter"]),
            NotebookOp::GetKernelStatus => OperationDescriptor::new(
                "get_kernel_status",
                "Get status and activity of a running Jupyter kernel",
                cat,
            )
            .param(kernel_id())
            .examples(&["is the kernel busy", "check kernel state"])
            .keywords(&["kernel", "status", "busy", "idle", "jupyter"]),
            NotebookOp::InterruptKernel => OperationDescriptor::new(
                "interrupt_kernel",
                "Interrupt code currently running in a Jupyter kernel",
                cat,
            )
            .param(kernel_id())
            .examples(&["stop a long running cell", "cancel execution"])
            .keywords(&["interrupt", "cancel", "kernel", "jupyter"]),
            NotebookOp::RestartKernel => OperationDescriptor::new(
                "restart_kernel",
                "Restart a Jupyter kernel, clearing all variables and state",
                cat,
            )
            .param(kernel_id())
            .examples(&["reset notebook state", "restart python session"])
            .keywords(&["restart", "reset", "kernel", "jupyter"]),
            NotebookOp::ShutdownKernel => OperationDescriptor::new(
                "shutdown_kernel",
                "Shut down a Jupyter kernel completely",
                cat,
            )
            .param(kernel_id())
            .examples(&["close notebook session", "free kernel resources"])
            .keywords(&["shutdown", "close", "kernel", "jupyter"]),
            NotebookOp::ListRunningKernels => OperationDescriptor::new(
                "list_running_kernels",
                "List all currently active Jupyter kernels",
                cat,
            )
            .examples(&["check active sessions", "view running kernels", "kernel management"])
            .keywords(&["kernels", "jupyter", "sessions", "active", "running"]),
            NotebookOp::CreateNotebookWithCode => OperationDescriptor::new(
                "create_notebook_with_code",
                "Create a new Jupyter notebook with predefined code cells",
                cat,
            )
            .param(ParameterSpec::required("path", ParamType::Str))
            .param(ParameterSpec::required("code_blocks", ParamType::List))
            .param(ParameterSpec::with_default("kernel_name", ParamType::Str, json!("python3")))
            .examples(&[
                "create analysis notebook",
                "setup data science workflow",
                "generate report template",
            ])
            .keywords(&["notebook", "create", "jupyter", "template", "analysis"]),
            NotebookOp::ExecuteCodeWithResults => OperationDescriptor::new(
                "execute_code_with_results",
                "Execute code in a Jupyter kernel and wait for its results",
                cat,
            )
            .param(kernel_id())
            .param(ParameterSpec::required("code", ParamType::Str))
            .param(ParameterSpec::with_default(
                "timeout",
                ParamType::Int,
                json!(EXECUTION_TIMEOUT_SECS),
            ))
            .examples(&[
                "run code and show output",
                "evaluate expression in notebook",
                "get cell results",
            ])
            .keywords(&["execute", "results", "output", "wait", "jupyter"]),
            NotebookOp::ExecuteNotebookCells => OperationDescriptor::new(
                "execute_notebook_cells",
                "Run every code cell of a notebook in a Jupyter kernel",
                cat,
            )
            .param(kernel_id())
            .param(ParameterSpec::required("notebook_path", ParamType::Str))
            .examples(&["run all cells", "execute whole notebook", "rerun analysis notebook"])
            .keywords(&["notebook", "cells", "run all", "execute", "jupyter"]),
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        let api = Jupyter {
            http: &ctx.http,
            base: ctx.config.jupyter_url.trim_end_matches('/'),
            token: ctx.config.jupyter_token.as_deref(),
        };

        match self {
            NotebookOp::ListAvailableKernels => api.call(Method::GET, "/kernelspecs", None).await,
            NotebookOp::StartKernel => {
                api.start_kernel(args.str("kernel_name")?, args.str("path")?).await
            }
            NotebookOp::ExecuteCode => {
                let id = kernel_id(&args)?;
                let body = json!({ "code": args.str("code")?, "silent": args.bool("silent")? });
                api.call(Method::POST, &format!("/kernels/{}/execute", id), Some(body))
                    .await
            }
            NotebookOp::GetKernelStatus => {
                let id = kernel_id(&args)?;
                api.call(Method::GET, &format!("/kernels/{}", id), None).await
            }
            NotebookOp::InterruptKernel | NotebookOp::RestartKernel => {
                let id = kernel_id(&args)?;
                let action = if self == NotebookOp::InterruptKernel {
                    "interrupt"
                } else {
                    "restart"
                };
                api.call(Method::POST, &format!("/kernels/{}/{}", id, action), None)
                    .await
            }
            NotebookOp::ShutdownKernel => {
                let id = kernel_id(&args)?;
                api.call(Method::DELETE, &format!("/kernels/{}", id), None).await?;
                Ok(json!({ "kernel_id": id, "shutdown": true }))
            }
            NotebookOp::ListRunningKernels => api.call(Method::GET, "/kernels", None).await,
            NotebookOp::CreateNotebookWithCode => {
                let path = args.str("path")?.trim_start_matches('/');
                if path.is_empty() {
                    return Err(AppError::InvalidArgument("path must not be empty".to_string()));
                }
                let blocks = args.str_list("code_blocks")?;
                let body = json!({
                    "type": "notebook",
                    "format": "json",
                    "content": notebook_document(&blocks),
                });
                let encoded = utf8_percent_encode(path, CONTENTS_PATH).to_string();
                let notebook = api
                    .call(Method::PUT, &format!("/contents/{}", encoded), Some(body))
                    .await?;

                let directory = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
                let kernel = api.start_kernel(args.str("kernel_name")?, directory).await?;
                tracing::info!(path, cells = blocks.len(), "Notebook created");
                Ok(json!({ "notebook": notebook, "kernel": kernel }))
            }
            NotebookOp::ExecuteCodeWithResults => {
                let id = kernel_id(&args)?;
                let timeout = args.int("timeout")?;
                if timeout < 1 {
                    return Err(AppError::InvalidArgument(format!(
                        "timeout must be at least 1 second, got {}",
                        timeout
                    )));
                }
                api.execute_with_results(id, args.str("code")?, timeout as u64).await
            }
            NotebookOp::ExecuteNotebookCells => {
                let id = kernel_id(&args)?;
                let notebook_path = args.str("notebook_path")?;
                let path = notebook_path.trim_start_matches('/');
                if path.is_empty() {
                    return Err(AppError::InvalidArgument(
                        "notebook_path must not be empty".to_string(),
                    ));
                }
                let encoded = utf8_percent_encode(path, CONTENTS_PATH).to_string();
                let notebook = api
                    .call(Method::GET, &format!("/contents/{}", encoded), None)
                    .await?;
                let content = &notebook["content"];
                if is_blank(content) {
                    return Err(AppError::capability(format!(
                        "No notebook content found at {}",
                        path
                    )));
                }

                let mut results = Vec::new();
                for (index, cell) in content["cells"].as_array().into_iter().flatten().enumerate() {
                    if cell["cell_type"] != "code" {
                        continue;
                    }
                    let code = cell_source(&cell["source"]);
                    // A failing cell is reported in place; later cells still run.
                    let result = match api
                        .execute_with_results(id, &code, EXECUTION_TIMEOUT_SECS as u64)
                        .await
                    {
                        Ok(value) => value,
                        Err(e) => json!({ "status": "failed", "kind": e.kind(), "error": e.to_string() }),
                    };
                    results.push(json!({ "cell_index": index, "code": code, "result": result }));
                }
                tracing::info!(path, kernel_id = id, cells = results.len(), "Notebook executed");
                Ok(json!({
                    "notebook_path": notebook_path,
                    "kernel_id": id,
                    "execution_results": results,
                }))
            }
        }
    }
}

struct Jupyter<'a> {
    http: &'a reqwest::Client,
    base: &'a str,
    token: Option<&'a str>,
}

impl Jupyter<'_> {
    async fn call(&self, method: Method, endpoint: &str, body: Option<Value>) -> Result<Value> {
        let mut request = self
            .http
            .request(method.clone(), format!("{}/api{}", self.base, endpoint));
        if let Some(token) = self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {}", token));
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let (status, value) = response_json(request.send().await?).await?;
        if !(200..300).contains(&status) {
            let message = value["message"]
                .as_str()
                .or_else(|| value["reason"].as_str())
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            tracing::warn!(%method, endpoint, status, "Jupyter API request failed");
            return Err(AppError::capability(format!(
                "Jupyter API error ({}): {}",
                status, message
            )));
        }
        if value.is_null() {
            return Ok(json!({ "status": "success" }));
        }
        Ok(value)
    }

    /// Submit `code`, then poll the kernel channel until its reply carries content.
    async fn execute_with_results(&self, kernel_id: &str, code: &str, timeout_secs: u64) -> Result<Value> {
        let submitted = self
            .call(
                Method::POST,
                &format!("/kernels/{}/execute", kernel_id),
                Some(json!({ "code": code })),
            )
            .await?;
        let msg_id = submitted["metadata"]["id"]
            .as_str()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::capability("No message ID returned from execution"))?;
        let channel = format!(
            "/kernels/{}/channels?session_id={}",
            kernel_id,
            utf8_percent_encode(msg_id, NON_ALPHANUMERIC)
        );

        let poll = async {
            loop {
                let reply = self.call(Method::GET, &channel, None).await?;
                if !is_blank(&reply["content"]) {
                    return Ok::<_, AppError>(reply);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(timeout_secs), poll)
            .await
            .map_err(|_| {
                AppError::TimeoutError(format!(
                    "Timeout after {} seconds waiting for results",
                    timeout_secs
                ))
            })?
    }

    async fn start_kernel(&self, name: &str, path: &str) -> Result<Value> {
        let mut body = json!({ "name": name });
        if !path.is_empty() {
            body["path"] = json!(path);
        }
        self.call(Method::POST, "/kernels", Some(body)).await
    }
}

/// Kernel ids are UUIDs; anything that could escape the path segment is refused.
fn kernel_id(args: &BoundArgs) -> Result<&str> {
    let id = args.str("kernel_id")?.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(AppError::InvalidArgument(format!("'{}' is not a kernel id", id)));
    }
    Ok(id)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

/// Cell source is either one string or a list of lines.
fn cell_source(source: &Value) -> String {
    match source {
        Value::String(text) => text.clone(),
        Value::Array(lines) => lines.iter().filter_map(Value::as_str).collect(),
        _ => String::new(),
    }
}

/// An nbformat 4.4 document with one code cell per block.
fn notebook_document(blocks: &[String]) -> Value {
    let cells: Vec<Value> = blocks
        .iter()
        .map(|code| {
            json!({
                "cell_type": "code",
                "execution_count": null,
                "metadata": {},
                "source": code.split_inclusive('\n').collect::<Vec<_>>(),
                "outputs": [],
            })
        })
        .collect();
    json!({
        "cells": cells,
        "metadata": {},
        "nbformat": 4,
        "nbformat_minor": 4,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing;
    use crate::config::Config;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct Seen {
        notebooks: Arc<Mutex<Vec<(String, Value)>>>,
        kernels: Arc<Mutex<Vec<Value>>>,
        auth: Arc<Mutex<Vec<Option<String>>>>,
        /// Submitted code, indexed by message number.
        executions: Arc<Mutex<Vec<String>>>,
        polls: Arc<Mutex<HashMap<String, usize>>>,
    }

    async fn mock_jupyter(seen: Seen) -> String {
        async fn start(
            State(seen): State<Seen>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            seen.auth.lock().unwrap().push(auth);
            seen.kernels.lock().unwrap().push(body.clone());
            (
                StatusCode::CREATED,
                Json(json!({ "id": "k-1", "name": body["name"], "execution_state": "starting" })),
            )
        }

        async fn kernel(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
            if id != "k-1" {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({ "message": format!("Kernel does not exist: {}", id) })),
                );
            }
            (StatusCode::OK, Json(json!({ "id": id, "execution_state": "idle" })))
        }

        async fn contents(
            State(seen): State<Seen>,
            Path(path): Path<String>,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            seen.notebooks.lock().unwrap().push((path.clone(), body));
            (StatusCode::CREATED, Json(json!({ "path": path, "type": "notebook" })))
        }

        async fn execute(State(seen): State<Seen>, Json(body): Json<Value>) -> Json<Value> {
            let code = body["code"].as_str().unwrap_or_default().to_string();
            if code.contains("no-reply-id") {
                return Json(json!({}));
            }
            let mut executions = seen.executions.lock().unwrap();
            executions.push(code);
            Json(json!({ "metadata": { "id": format!("msg-{}", executions.len() - 1) } }))
        }

        async fn channel(
            State(seen): State<Seen>,
            Query(query): Query<HashMap<String, String>>,
        ) -> Json<Value> {
            let msg_id = query.get("session_id").cloned().unwrap_or_default();
            let index: usize = msg_id.trim_start_matches("msg-").parse().unwrap();
            let code = seen.executions.lock().unwrap()[index].clone();
            let mut polls = seen.polls.lock().unwrap();
            let count = polls.entry(msg_id).or_insert(0);
            *count += 1;
            // The first poll is never ready; code that "sleeps" never finishes.
            if *count == 1 || code.contains("sleep") {
                return Json(json!({ "content": {} }));
            }
            Json(json!({ "content": { "status": "ok", "echo": code } }))
        }

        async fn read_notebook(Path(path): Path<String>) -> (StatusCode, Json<Value>) {
            if path != "analysis.ipynb" {
                return (StatusCode::NOT_FOUND, Json(json!({ "message": "No such file" })));
            }
            let content = json!({
                "cells": [
                    { "cell_type": "markdown", "source": "# Title" },
                    { "cell_type": "code", "source": ["x = 1\n", "print(x)"] },
                    { "cell_type": "code", "source": "y = 2" },
                ],
                "nbformat": 4,
                "nbformat_minor": 4,
            });
            (StatusCode::OK, Json(json!({ "path": path, "content": content })))
        }

        let app = Router::new()
            .route("/api/kernels", post(start))
            .route("/api/kernels/:id", get(kernel).delete(|| async { StatusCode::NO_CONTENT }))
            .route("/api/kernels/:id/execute", post(execute))
            .route("/api/kernels/:id/channels", get(channel))
            .route("/api/contents/*path", put(contents).get(read_notebook))
            .with_state(seen);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn ctx_for(seen: &Seen, token: Option<&str>) -> (tempfile::TempDir, Arc<CapabilityContext>) {
        let dir = tempdir().unwrap();
        let mut config = Config::for_workspace(dir.path());
        config.jupyter_url = mock_jupyter(seen.clone()).await;
        config.jupyter_token = token.map(str::to_string);
        let ctx = testing::context_with(config);
        (dir, ctx)
    }

    #[tokio::test]
    async fn test_start_kernel_sends_token_when_configured() {
        let seen = Seen::default();
        let (_dir, ctx) = ctx_for(&seen, Some("secret")).await;
        let kernel = testing::run(NotebookOp::StartKernel, &ctx, json!({})).await.unwrap();
        assert_eq!(kernel["id"], "k-1");
        assert_eq!(seen.kernels.lock().unwrap()[0], json!({ "name": "python3" }));
        assert_eq!(seen.auth.lock().unwrap()[0].as_deref(), Some("token secret"));

        let (_dir, ctx) = ctx_for(&seen, None).await;
        testing::run(NotebookOp::StartKernel, &ctx, json!({ "path": "work" }))
            .await
            .unwrap();
        assert_eq!(seen.auth.lock().unwrap()[1], None);
        assert_eq!(seen.kernels.lock().unwrap()[1]["path"], "work");
    }

    #[tokio::test]
    async fn test_unknown_kernel_reports_server_message() {
        let seen = Seen::default();
        let (_dir, ctx) = ctx_for(&seen, None).await;
        let status = testing::run(NotebookOp::GetKernelStatus, &ctx, json!({ "kernel_id": "k-1" }))
            .await
            .unwrap();
        assert_eq!(status["execution_state"], "idle");

        let err = testing::run(NotebookOp::GetKernelStatus, &ctx, json!({ "kernel_id": "nope" }))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Jupyter API error (404): Kernel does not exist: nope");

        let err = testing::run(NotebookOp::ShutdownKernel, &ctx, json!({ "kernel_id": "../etc" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_create_notebook_writes_cells_and_starts_kernel() {
        let seen = Seen::default();
        let (_dir, ctx) = ctx_for(&seen, None).await;
        let out = testing::run(
            NotebookOp::CreateNotebookWithCode,
            &ctx,
            json!({ "path": "/reports/q3.ipynb", "code_blocks": ["import os\nprint(1)", "x = 2"] }),
        )
        .await
        .unwrap();
        assert_eq!(out["kernel"]["id"], "k-1");

        let notebooks = seen.notebooks.lock().unwrap();
        let (path, body) = &notebooks[0];
        assert_eq!(path, "reports/q3.ipynb");
        assert_eq!(body["type"], "notebook");
        assert_eq!(body["content"]["nbformat"], 4);
        assert_eq!(
            body["content"]["cells"][0]["source"],
            json!(["import os\n", "print(1)"])
        );
        assert_eq!(seen.kernels.lock().unwrap()[0]["path"], "reports");
    }

    #[tokio::test]
    async fn test_execute_with_results_polls_until_content() {
        let seen = Seen::default();
        let (_dir, ctx) = ctx_for(&seen, None).await;
        let out = testing::run(
            NotebookOp::ExecuteCodeWithResults,
            &ctx,
            json!({ "kernel_id": "k-1", "code": "print(42)" }),
        )
        .await
        .unwrap();
        assert_eq!(out["content"]["echo"], "print(42)");
        assert_eq!(seen.polls.lock().unwrap()["msg-0"], 2);

        let err = testing::run(
            NotebookOp::ExecuteCodeWithResults,
            &ctx,
            json!({ "kernel_id": "k-1", "code": "# no-reply-id" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "No message ID returned from execution");
    }

    #[tokio::test]
    async fn test_execute_with_results_times_out() {
        let seen = Seen::default();
        let (_dir, ctx) = ctx_for(&seen, None).await;
        let err = testing::run(
            NotebookOp::ExecuteCodeWithResults,
            &ctx,
            json!({ "kernel_id": "k-1", "code": "time.sleep(999)", "timeout": 1 }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::TimeoutError(_)));
        assert!(err.to_string().contains("1 seconds"));

        let err = testing::run(
            NotebookOp::ExecuteCodeWithResults,
            &ctx,
            json!({ "kernel_id": "k-1", "code": "x", "timeout": 0 }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_execute_notebook_cells_runs_code_cells_only() {
        let seen = Seen::default();
        let (_dir, ctx) = ctx_for(&seen, None).await;
        let out = testing::run(
            NotebookOp::ExecuteNotebookCells,
            &ctx,
            json!({ "kernel_id": "k-1", "notebook_path": "/analysis.ipynb" }),
        )
        .await
        .unwrap();

        let results = out["execution_results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["cell_index"], 1);
        assert_eq!(results[0]["code"], "x = 1\nprint(x)");
        assert_eq!(results[1]["cell_index"], 2);
        assert_eq!(results[1]["result"]["content"]["echo"], "y = 2");
        assert_eq!(*seen.executions.lock().unwrap(), vec!["x = 1\nprint(x)", "y = 2"]);

        let err = testing::run(
            NotebookOp::ExecuteNotebookCells,
            &ctx,
            json!({ "kernel_id": "k-1", "notebook_path": "missing.ipynb" }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Jupyter API error (404): No such file");
    }

    #[test]
    fn test_notebook_document_shape() {
        let doc = notebook_document(&[]);
        assert_eq!(doc["cells"], json!([]));
        assert_eq!(doc["nbformat_minor"], 4);
    }
}
