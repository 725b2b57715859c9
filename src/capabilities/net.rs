use super::fs::shown;
use super::{CapabilityContext, OperationSet};
use crate::error::{AppError, Result};
use crate::registry::{BoundArgs, OperationDescriptor, ParamType, ParameterSpec};
use crate::router::{write_handler, PathRouter, RouteResolver};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;

const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetOp {
    Fetch,
    CheckPort,
    StartWebServer,
    StartHttpServer,
    StopHttpServer,
    GenerateHttpServerEndpoint,
}

#[async_trait]
impl OperationSet for NetOp {
    const ALL: &'static [Self] = &[
        NetOp::Fetch,
        NetOp::CheckPort,
        NetOp::StartWebServer,
        NetOp::StartHttpServer,
        NetOp::StopHttpServer,
        NetOp::GenerateHttpServerEndpoint,
    ];

    fn describe(self) -> OperationDescriptor {
        match self {
            NetOp::Fetch => OperationDescriptor::new(
                "fetch",
                "Make HTTP requests to URLs with custom headers and data",
                "networking",
            )
            .param(ParameterSpec::required("url", ParamType::Str))
            .param(ParameterSpec::with_default("method", ParamType::Str, json!("GET")))
            .param(ParameterSpec::optional("headers", ParamType::Any))
            .param(ParameterSpec::optional("data", ParamType::Str))
            .examples(&[
                "download file from URL",
                "API request",
                "web scraping",
                "check website status",
                "POST data",
            ])
            .keywords(&["http", "request", "api", "download", "web", "fetch", "curl"]),
            NetOp::CheckPort => OperationDescriptor::new(
                "check_port",
                "Check if a network port is available or occupied",
                "networking",
            )
            .param(ParameterSpec::required("port", ParamType::Int))
            .param(ParameterSpec::with_default("host", ParamType::Str, json!("localhost")))
            .examples(&[
                "check if port 8080 is free",
                "test service availability",
                "port scanning",
                "network diagnostics",
            ])
            .keywords(&["port", "network", "check", "available", "occupied"]),
            NetOp::StartWebServer => OperationDescriptor::new(
                "start_web_server",
                "Start a simple HTTP server serving files from a directory",
                "networking",
            )
            .param(ParameterSpec::with_default("port", ParamType::Int, json!(8080)))
            .param(ParameterSpec::with_default("directory", ParamType::Str, json!(".")))
            .examples(&[
                "serve static files",
                "local development server",
                "share files via HTTP",
                "host website",
            ])
            .keywords(&["server", "http", "serve", "static", "web", "host"]),
            NetOp::StartHttpServer => OperationDescriptor::new(
                "start_http_server",
                "Start an advanced HTTP server with custom route handling",
                "networking",
            )
            .param(ParameterSpec::required("port", ParamType::Int))
            .param(ParameterSpec::optional("routes_dir", ParamType::Str))
            .examples(&[
                "create API server",
                "custom endpoints",
                "REST API",
                "web service",
                "backend server",
            ])
            .keywords(&["api", "server", "routes", "endpoints", "REST", "backend"]),
            NetOp::StopHttpServer => OperationDescriptor::new(
                "stop_http_server",
                "Stop an HTTP or static web server started on a port",
                "networking",
            )
            .param(ParameterSpec::required("port", ParamType::Int))
            .examples(&["shut down API server", "free the port", "stop serving files"])
            .keywords(&["stop", "server", "shutdown", "port", "http"]),
            NetOp::GenerateHttpServerEndpoint => OperationDescriptor::new(
                "generate_http_server_endpoint",
                "Create a custom endpoint handler for the HTTP server",
                "networking",
            )
            .param(ParameterSpec::required("endpoint", ParamType::Str))
            .param(ParameterSpec::required("code", ParamType::Str))
            .param(ParameterSpec::optional("method", ParamType::Str))
            .param(ParameterSpec::optional("routes_dir", ParamType::Str))
            .examples(&[
                "create API endpoint",
                "handle POST requests",
                "custom route logic",
                "webhook handler",
            ])
            .keywords(&["endpoint", "route", "handler", "api", "webhook"]),
        }
    }

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value> {
        match self {
            NetOp::Fetch => fetch(ctx, &args).await,
            NetOp::CheckPort => {
                let port = port(&args)?;
                let host = args.str("host")?;
                let occupied = matches!(
                    tokio::time::timeout(PORT_PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
                    Ok(Ok(_))
                );
                Ok(json!({ "port": port, "host": host, "occupied": occupied, "available": !occupied }))
            }
            NetOp::StartWebServer => {
                let directory = ctx.path(args.str("directory")?);
                let info = ctx.servers.start_static(port(&args)?, directory).await?;
                Ok(serde_json::to_value(info)?)
            }
            NetOp::StartHttpServer => {
                let routes_dir = routes_dir(ctx, &args)?;
                let router = PathRouter::from_config(&ctx.config, routes_dir);
                let info = ctx.servers.start_routes(port(&args)?, router).await?;
                Ok(serde_json::to_value(info)?)
            }
            NetOp::StopHttpServer => {
                let port = port(&args)?;
                if !ctx.servers.stop(port).await {
                    return Err(AppError::capability(format!("No server is running on port {}", port)));
                }
                Ok(json!({ "port": port, "stopped": true }))
            }
            NetOp::GenerateHttpServerEndpoint => {
                let resolver = RouteResolver::new(routes_dir(ctx, &args)?, &ctx.config.route_extension);
                let endpoint = args.str("endpoint")?;
                let method = args.opt_str("method")?;
                let path = write_handler(&resolver, endpoint, method, args.str("code")?).await?;
                Ok(json!({
                    "endpoint": format!("/{}", endpoint.trim().trim_matches('/')),
                    "method": method.map(str::to_ascii_uppercase),
                    "handler": shown(&path),
                }))
            }
        }
    }
}

fn port(args: &BoundArgs) -> Result<u16> {
    let raw = args.int("port")?;
    u16::try_from(raw).map_err(|_| AppError::InvalidArgument(format!("port {} is out of range", raw)))
}

fn routes_dir(ctx: &CapabilityContext, args: &BoundArgs) -> Result<PathBuf> {
    Ok(match args.opt_str("routes_dir")? {
        Some(dir) => ctx.path(dir),
        None => ctx.config.resolve_path(&ctx.config.routes_dir),
    })
}

async fn fetch(ctx: &CapabilityContext, args: &BoundArgs) -> Result<Value> {
    let url = args.str("url")?;
    let method_name = args.str("method")?;
    let method = Method::from_bytes(method_name.to_ascii_uppercase().as_bytes())
        .map_err(|_| AppError::InvalidArgument(format!("'{}' is not an HTTP method", method_name)))?;

    let mut request = ctx.http.request(method, url).headers(request_headers(args.get("headers"))?);
    if let Some(data) = args.opt_str("data")? {
        request = request.body(data.to_string());
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let headers: Map<String, Value> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
            )
        })
        .collect();
    let content = response.text().await?;

    Ok(json!({
        "status": status,
        "headers": headers,
        "content_length": content.len(),
        "content": content,
    }))
}

/// Headers given as a JSON object, or as a string holding one.
fn request_headers(raw: Option<&Value>) -> Result<HeaderMap> {
    let object = match raw {
        None => return Ok(HeaderMap::new()),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(HeaderMap::new()),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(AppError::InvalidArgument(
                    "headers must be a JSON object".to_string(),
                ))
            }
        },
        Some(_) => {
            return Err(AppError::InvalidArgument(
                "headers must be a JSON object".to_string(),
            ))
        }
    };

    let mut headers = HeaderMap::with_capacity(object.len());
    for (name, value) in object {
        let value = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| AppError::InvalidArgument(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| AppError::InvalidArgument(format!("invalid value for header '{}'", name)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing;
    use tempfile::tempdir;

    #[test]
    fn test_headers_from_string_or_object() {
        let h = request_headers(Some(&json!(r#"{"Accept": "text/plain"}"#))).unwrap();
        assert_eq!(h["accept"], "text/plain");
        let h = request_headers(Some(&json!({ "X-Count": 3 }))).unwrap();
        assert_eq!(h["x-count"], "3");
        assert!(request_headers(Some(&json!("not json"))).is_err());
        assert!(request_headers(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_port_out_of_range() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());
        let err = testing::run(NetOp::CheckPort, &ctx, json!({ "port": 70000 }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_static_server_serves_and_reports_port() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("site")).unwrap();
        std::fs::write(dir.path().join("site/index.html"), "<h1>home</h1>").unwrap();
        let ctx = testing::context(dir.path());

        let info = testing::run(NetOp::StartWebServer, &ctx, json!({ "port": 0, "directory": "site" }))
            .await
            .unwrap();
        let port = info["port"].as_u64().unwrap();

        let probe = testing::run(NetOp::CheckPort, &ctx, json!({ "port": port, "host": "127.0.0.1" }))
            .await
            .unwrap();
        assert_eq!(probe["occupied"], true);

        let page = testing::run(
            NetOp::Fetch,
            &ctx,
            json!({ "url": format!("http://127.0.0.1:{}/missing/page", port) }),
        )
        .await
        .unwrap();
        assert_eq!(page["status"], 200);
        assert_eq!(page["content"], "<h1>home</h1>");

        testing::run(NetOp::StopHttpServer, &ctx, json!({ "port": port }))
            .await
            .unwrap();
        assert!(testing::run(NetOp::StopHttpServer, &ctx, json!({ "port": port }))
            .await
            .is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generated_endpoint_is_served() {
        let dir = tempdir().unwrap();
        let ctx = testing::context(dir.path());

        testing::run(
            NetOp::GenerateHttpServerEndpoint,
            &ctx,
            json!({ "endpoint": "/greet", "code": "echo '{\"greeting\": \"hi\"}'", "method": "post" }),
        )
        .await
        .unwrap();

        let info = testing::run(NetOp::StartHttpServer, &ctx, json!({ "port": 0 }))
            .await
            .unwrap();
        let port = info["port"].as_u64().unwrap();

        let posted = testing::run(
            NetOp::Fetch,
            &ctx,
            json!({ "url": format!("http://127.0.0.1:{}/greet", port), "method": "POST", "data": "{}" }),
        )
        .await
        .unwrap();
        assert_eq!(posted["status"], 200);
        assert_eq!(posted["headers"]["content-type"], "application/json");
        assert_eq!(posted["content"], r#"{"greeting":"hi"}"#);

        let get = testing::run(
            NetOp::Fetch,
            &ctx,
            json!({ "url": format!("http://127.0.0.1:{}/greet", port) }),
        )
        .await
        .unwrap();
        assert_eq!(get["status"], 404);

        ctx.servers.shutdown().await;
    }
}
