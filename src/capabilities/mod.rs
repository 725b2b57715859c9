//! Built-in capabilities registered at startup.
//!
//! Each category module declares a `Copy` enum of operations implementing
//! [`OperationSet`]; [`build_registry`] turns every variant into a registered
//! [`Capability`] sharing one [`CapabilityContext`].

pub mod cloud;
pub mod comms;
pub mod discovery;
pub mod fs;
pub mod generators;
pub mod net;
pub mod notebook;
pub mod python;
pub mod storage;
pub mod system;
pub mod utility;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::index::SemanticIndex;
use crate::registry::{BoundArgs, Capability, CapabilityRegistry, OperationDescriptor};
use crate::router::RouteServerManager;
use crate::store::StorePool;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Collaborators shared by every built-in capability.
pub struct CapabilityContext {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub stores: StorePool,
    pub servers: Arc<RouteServerManager>,
    pub index: Arc<SemanticIndex>,
    catalog: OnceLock<Vec<OperationDescriptor>>,
}

impl CapabilityContext {
    pub fn new(
        config: Arc<Config>,
        servers: Arc<RouteServerManager>,
        index: Arc<SemanticIndex>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(concat!("toolhub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::capability(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http,
            stores: StorePool::new(),
            servers,
            index,
            catalog: OnceLock::new(),
        })
    }

    /// Descriptors of every registered operation, fixed once the registry is built.
    pub fn catalog(&self) -> &[OperationDescriptor] {
        self.catalog.get().map(Vec::as_slice).unwrap_or(&[])
    }

    fn set_catalog(&self, descriptors: Vec<OperationDescriptor>) {
        if self.catalog.set(descriptors).is_err() {
            tracing::warn!("Capability catalog was already set; keeping the first one");
        }
    }

    /// A caller-supplied path resolved against the workspace.
    pub fn path(&self, raw: &str) -> PathBuf {
        self.config.resolve_path(raw)
    }

    /// The workspace, or `cwd` resolved against it.
    pub fn working_dir(&self, cwd: Option<&str>) -> PathBuf {
        match cwd {
            Some(cwd) => self.path(cwd),
            None => self.config.workspace_dir.clone(),
        }
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.config.shell_timeout_secs)
    }
}

/// A closed family of operations sharing one implementation.
#[async_trait]
pub trait OperationSet: Copy + Send + Sync + 'static {
    const ALL: &'static [Self];

    fn describe(self) -> OperationDescriptor;

    async fn run(self, ctx: &CapabilityContext, args: BoundArgs) -> Result<Value>;
}

struct Operation<O> {
    op: O,
    descriptor: OperationDescriptor,
    ctx: Arc<CapabilityContext>,
}

#[async_trait]
impl<O: OperationSet> Capability for Operation<O> {
    fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, args: BoundArgs) -> Result<Value> {
        self.op.run(&self.ctx, args).await
    }
}

pub fn register_set<O: OperationSet>(registry: &mut CapabilityRegistry, ctx: &Arc<CapabilityContext>) {
    for &op in O::ALL {
        registry.register(Arc::new(Operation {
            op,
            descriptor: op.describe(),
            ctx: Arc::clone(ctx),
        }));
    }
}

/// Register every built-in capability and freeze the discovery catalog.
pub fn build_registry(ctx: &Arc<CapabilityContext>) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    register_set::<utility::UtilityOp>(&mut registry, ctx);
    register_set::<fs::FsOp>(&mut registry, ctx);
    register_set::<system::SystemOp>(&mut registry, ctx);
    register_set::<python::PythonOp>(&mut registry, ctx);
    register_set::<net::NetOp>(&mut registry, ctx);
    register_set::<storage::StorageOp>(&mut registry, ctx);
    register_set::<cloud::CloudOp>(&mut registry, ctx);
    register_set::<notebook::NotebookOp>(&mut registry, ctx);
    register_set::<generators::GeneratorOp>(&mut registry, ctx);
    register_set::<comms::CommsOp>(&mut registry, ctx);
    register_set::<discovery::DiscoveryOp>(&mut registry, ctx);

    ctx.set_catalog(registry.descriptors());
    tracing::info!(
        operations = registry.len(),
        categories = registry.categories().len(),
        "Capabilities registered"
    );
    registry
}

/// Credential from configuration, or an error naming the variable to set.
pub(crate) fn require_credential<'a>(value: &'a Option<String>, variable: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| AppError::capability(format!("{} is not set", variable)))
}

/// Parse a JSON response body, falling back to the raw text when it is not JSON.
pub(crate) async fn response_json(response: reqwest::Response) -> Result<(u16, Value)> {
    let status = response.status().as_u16();
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok((status, Value::Null));
    }
    let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok((status, value))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::inference::HashingEmbedder;
    use serde_json::Map;

    /// A context rooted at `workspace`, with the hashing embedder and no credentials.
    pub fn context(workspace: &std::path::Path) -> Arc<CapabilityContext> {
        context_with(crate::config::Config::for_workspace(workspace))
    }

    pub fn context_with(config: Config) -> Arc<CapabilityContext> {
        let config = Arc::new(config);
        let servers = Arc::new(RouteServerManager::from_config(&config));
        let index = Arc::new(SemanticIndex::new(Arc::new(HashingEmbedder::new(128))));
        Arc::new(CapabilityContext::new(config, servers, index).unwrap())
    }

    pub fn args(value: Value) -> BoundArgs {
        BoundArgs::new(value.as_object().cloned().unwrap_or_else(Map::new))
    }

    /// Bind `value` the way the dispatcher would, so defaults are applied.
    pub async fn run<O: OperationSet>(op: O, ctx: &CapabilityContext, value: Value) -> Result<Value> {
        let map = value.as_object().cloned().unwrap_or_else(Map::new);
        let bound = crate::dispatch::bind(&op.describe(), &map)?;
        op.run(ctx, bound).await
    }
}
