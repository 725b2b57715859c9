use crate::capabilities::{build_registry, CapabilityContext};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::index::SemanticIndex;
use crate::inference::{load_embedder, Embedder};
use crate::registry::CapabilityRegistry;
use crate::router::RouteServerManager;
use std::sync::Arc;

/// Application state shared across all request handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<CapabilityRegistry>,
    pub dispatcher: Dispatcher,
    pub index: Arc<SemanticIndex>,
    pub servers: Arc<RouteServerManager>,
    pub context: Arc<CapabilityContext>,
}

impl AppState {
    /// Load the configured embedder, register every capability and build the index.
    pub fn new(config: Config) -> Result<Self> {
        let embedder = load_embedder(&config)?;
        Self::with_embedder(config, embedder)
    }

    /// Like [`AppState::new`] with an explicit embedder.
    ///
    /// A failed initial index build is logged, not fatal: invocation keeps
    /// working and search answers 503 until a refresh succeeds.
    pub fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let config = Arc::new(config);
        let index = Arc::new(
            SemanticIndex::new(embedder).with_snapshot(config.resolve_path(&config.embeddings_cache_path)),
        );
        let servers = Arc::new(RouteServerManager::from_config(&config));
        let context = Arc::new(CapabilityContext::new(
            Arc::clone(&config),
            Arc::clone(&servers),
            Arc::clone(&index),
        )?);

        let registry = Arc::new(build_registry(&context));
        let dispatcher = Dispatcher::new(Arc::clone(&registry));

        let state = Self {
            config,
            registry,
            dispatcher,
            index,
            servers,
            context,
        };

        // Nothing else can reach the index yet, so build it inline.
        match state.index.rebuild(state.context.catalog()) {
            Ok(indexed) => tracing::info!(indexed, "Semantic tool index built"),
            Err(e) => tracing::error!(error = %e, "Initial index build failed"),
        }

        Ok(state)
    }

    /// Re-embed every registered operation.
    pub async fn refresh_index(&self) -> Result<usize> {
        self.index.refresh(self.context.catalog().to_vec()).await
    }

    /// Ready once the semantic index has been built, by any caller.
    pub fn is_ready(&self) -> bool {
        self.index.is_built()
    }
}
