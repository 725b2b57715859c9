//! Lifecycle of route sub-servers and static file servers, one per port.

use super::PathRouter;
use crate::config::Config;
use crate::error::{AppError, Result};
use axum::Router;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    /// Path router executing handler scripts.
    Routes,
    /// Static files with `index.html` fallback.
    Static,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub port: u16,
    pub address: String,
    pub kind: ServerKind,
    pub root: PathBuf,
}

struct RunningServer {
    info: ServerInfo,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Servers started at runtime by capabilities or at boot.
///
/// Cancelling the manager's root token stops every server it started.
pub struct RouteServerManager {
    host: String,
    servers: Mutex<BTreeMap<u16, RunningServer>>,
    root: CancellationToken,
}

impl RouteServerManager {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            servers: Mutex::new(BTreeMap::new()),
            root: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.host.clone())
    }

    /// Start a path router on `port` serving handlers from `router`'s directory.
    pub async fn start_routes(&self, port: u16, router: PathRouter) -> Result<ServerInfo> {
        let root = router.routes_dir().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        self.start(port, ServerKind::Routes, root, router.into_router())
            .await
    }

    /// Serve `directory` as static files on `port`; unknown paths get `index.html`.
    pub async fn start_static(&self, port: u16, directory: PathBuf) -> Result<ServerInfo> {
        if !directory.is_dir() {
            return Err(AppError::CapabilityError(format!(
                "Directory not found: {}",
                directory.display()
            )));
        }
        let service =
            ServeDir::new(&directory).fallback(ServeFile::new(directory.join("index.html")));
        let app = Router::new()
            .fallback_service(service)
            .layer(TraceLayer::new_for_http());
        self.start(port, ServerKind::Static, directory, app).await
    }

    async fn start(
        &self,
        port: u16,
        kind: ServerKind,
        root: PathBuf,
        app: Router,
    ) -> Result<ServerInfo> {
        let mut servers = self.servers.lock().await;
        if servers.contains_key(&port) {
            return Err(AppError::CapabilityError(format!(
                "A server is already running on port {}",
                port
            )));
        }

        let addr = format!("{}:{}", self.host, port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            AppError::CapabilityError(format!("Port {} is not available: {}", port, e))
        })?;
        let bound: SocketAddr = listener.local_addr()?;

        let token = self.root.child_token();
        let shutdown = token.clone();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(port, error = %e, "Sub-server stopped with error");
            }
        });

        let info = ServerInfo {
            port: bound.port(),
            address: format!("http://{}", bound),
            kind,
            root,
        };
        tracing::info!(
            port = info.port,
            kind = ?kind,
            root = %info.root.display(),
            "Sub-server started"
        );

        servers.insert(
            info.port,
            RunningServer {
                info: info.clone(),
                token,
                handle,
            },
        );
        Ok(info)
    }

    /// Stop the server on `port`. Returns false when none was running there.
    pub async fn stop(&self, port: u16) -> bool {
        let server = self.servers.lock().await.remove(&port);
        match server {
            Some(server) => {
                server.token.cancel();
                if let Err(e) = server.handle.await {
                    tracing::warn!(port, error = %e, "Sub-server task failed");
                }
                tracing::info!(port, "Sub-server stopped");
                true
            }
            None => false,
        }
    }

    pub async fn list(&self) -> Vec<ServerInfo> {
        self.servers
            .lock()
            .await
            .values()
            .map(|s| s.info.clone())
            .collect()
    }

    /// Stop every server and wait for them to drain.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let servers = std::mem::take(&mut *self.servers.lock().await);
        for (port, server) in servers {
            if let Err(e) = server.handle.await {
                tracing::warn!(port, error = %e, "Sub-server task failed during shutdown");
            }
        }
    }
}
