//! Semantic tool index.
//!
//! One embedding per registered operation, built from its canonical text and
//! searched by cosine similarity. A rebuild replaces the whole table at once;
//! readers keep using the previous table until the swap.

pub mod text;

pub use text::{canonical_text, parameters_text};

use crate::error::{AppError, Result};
use crate::inference::{cosine_similarity, Embedder};
use crate::persistence::{try_load_snapshot, IndexSnapshot, SnapshotKey};
use crate::registry::OperationDescriptor;
use indexmap::IndexMap;
use ndarray::Array2;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// How long a caller waits for an embedding slot before giving up with a 503.
const PERMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// A ranked search result with the descriptor fields needed to render it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub name: String,
    pub score: f32,
    pub category: String,
    pub description: String,
    pub parameters: String,
    pub examples: Vec<String>,
    pub keywords: Vec<String>,
}

/// Denormalized copy of the searchable descriptor fields.
struct IndexEntry {
    point_id: u64,
    name: String,
    category: String,
    description: String,
    parameters: String,
    examples: Vec<String>,
    keywords: Vec<String>,
}

impl IndexEntry {
    fn from_descriptor(point_id: u64, descriptor: &OperationDescriptor) -> Self {
        Self {
            point_id,
            name: descriptor.name.clone(),
            category: descriptor.category.clone(),
            description: descriptor.description.clone(),
            parameters: parameters_text(descriptor),
            examples: descriptor.examples.clone(),
            keywords: descriptor.keywords.clone(),
        }
    }

    fn hit(&self, score: f32) -> SearchHit {
        SearchHit {
            name: self.name.clone(),
            score,
            category: self.category.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            examples: self.examples.clone(),
            keywords: self.keywords.clone(),
        }
    }
}

struct IndexTable {
    entries: Vec<IndexEntry>,
    /// Shape (entries.len(), dimension), row i belongs to entries[i]
    embeddings: Array2<f32>,
}

pub struct SemanticIndex {
    embedder: Arc<dyn Embedder>,
    table: RwLock<Option<Arc<IndexTable>>>,
    /// Serializes rebuilds; queries never take it.
    rebuild_lock: Mutex<()>,
    /// One permit per concurrent embedding call the embedder can serve.
    permits: Arc<Semaphore>,
    snapshot_path: Option<PathBuf>,
}

/// Deterministic point id: the first 8 bytes of SHA-256 of the operation name.
pub fn point_id(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

impl SemanticIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let permits = embedder
            .max_concurrency()
            .map(|n| n.clamp(1, Semaphore::MAX_PERMITS))
            .unwrap_or(Semaphore::MAX_PERMITS);
        Self {
            embedder,
            table: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
            permits: Arc::new(Semaphore::new(permits)),
            snapshot_path: None,
        }
    }

    /// Persist the embedding matrix to `path` and reuse it while valid.
    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Replace the whole index with embeddings of `descriptors`.
    ///
    /// Points are keyed by [`point_id`], so a name that appears twice is
    /// indexed once with its last descriptor. Returns the number of points.
    pub fn rebuild(&self, descriptors: &[OperationDescriptor]) -> Result<usize> {
        let _guard = self
            .rebuild_lock
            .lock()
            .map_err(|_| AppError::IndexUnavailable("Index rebuild lock poisoned".into()))?;
        let start = Instant::now();

        let mut points: IndexMap<u64, &OperationDescriptor> = IndexMap::new();
        for descriptor in descriptors {
            points.insert(point_id(&descriptor.name), descriptor);
        }

        let texts: Vec<String> = points.values().map(|d| canonical_text(d)).collect();
        let dimension = self.embedder.dimension();

        let embeddings = if texts.is_empty() {
            Array2::zeros((0, dimension))
        } else {
            self.embed_documents(&points, &texts)?
        };

        let entries: Vec<IndexEntry> = points
            .iter()
            .map(|(id, descriptor)| IndexEntry::from_descriptor(*id, descriptor))
            .collect();
        let count = entries.len();

        let table = Arc::new(IndexTable {
            entries,
            embeddings,
        });
        *self
            .table
            .write()
            .map_err(|_| AppError::IndexUnavailable("Index lock poisoned".into()))? = Some(table);

        metrics::gauge!("indexed_operations").set(count as f64);
        tracing::info!(
            points = count,
            dimension,
            model = %self.embedder.model_id(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Tool index rebuilt"
        );

        Ok(count)
    }

    fn embed_documents(
        &self,
        points: &IndexMap<u64, &OperationDescriptor>,
        texts: &[String],
    ) -> Result<Array2<f32>> {
        let model_id = self.embedder.model_id();
        let dimension = self.embedder.dimension();
        let keys: Vec<SnapshotKey<'_>> = points
            .values()
            .zip(texts)
            .map(|(d, text)| SnapshotKey {
                name: &d.name,
                text,
            })
            .collect();

        if let Some(path) = &self.snapshot_path {
            if let Some(cached) = try_load_snapshot(path, model_id, &keys, dimension) {
                return Ok(cached);
            }
        }

        let embeddings = self
            .embedder
            .embed_batch(texts)
            .map_err(|e| AppError::IndexUnavailable(format!("Embedding failed: {}", e)))?;

        if embeddings.nrows() != texts.len() || embeddings.ncols() != dimension {
            return Err(AppError::IndexUnavailable(format!(
                "Embedder returned shape {:?}, expected ({}, {})",
                embeddings.shape(),
                texts.len(),
                dimension
            )));
        }

        if let Some(path) = &self.snapshot_path {
            let snapshot = IndexSnapshot::new(model_id, &keys, embeddings.clone());
            if let Err(e) = snapshot.save(path) {
                tracing::warn!(error = %e, "Failed to save index snapshot");
            }
        }

        Ok(embeddings)
    }

    /// The `k` operations most similar to `text`, best first.
    ///
    /// Equal scores are ordered by name. Fails with `IndexUnavailable` before
    /// the first successful rebuild or when the query cannot be embedded.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        let table = self.snapshot()?;

        if table.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = self
            .embedder
            .embed(text)
            .map_err(|e| AppError::IndexUnavailable(format!("Query embedding failed: {}", e)))?;
        let scores = cosine_similarity(&query, &table.embeddings);

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| table.entries[a.0].name.cmp(&table.entries[b.0].name))
        });

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(idx, score)| table.entries[idx].hit(score))
            .collect())
    }

    /// [`SemanticIndex::query`] on the blocking pool, holding an embedding permit.
    pub async fn search(self: &Arc<Self>, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        let permit = self.acquire_permit().await?;
        let index = Arc::clone(self);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            index.query(&text, k)
        })
        .await
        .map_err(|e| AppError::IndexUnavailable(format!("Search task join error: {}", e)))?
    }

    /// [`SemanticIndex::rebuild`] on the blocking pool, holding an embedding permit.
    pub async fn refresh(self: &Arc<Self>, descriptors: Vec<OperationDescriptor>) -> Result<usize> {
        let permit = self.acquire_permit().await?;
        let index = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            index.rebuild(&descriptors)
        })
        .await
        .map_err(|e| AppError::IndexUnavailable(format!("Rebuild task join error: {}", e)))?
    }

    async fn acquire_permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        tokio::time::timeout(PERMIT_TIMEOUT, Arc::clone(&self.permits).acquire_owned())
            .await
            .map_err(|_| {
                AppError::IndexUnavailable("Embedder temporarily overloaded, please retry".into())
            })?
            .map_err(|_| AppError::IndexUnavailable("Embedding permits closed".into()))
    }

    fn snapshot(&self) -> Result<Arc<IndexTable>> {
        self.table
            .read()
            .map_err(|_| AppError::IndexUnavailable("Index lock poisoned".into()))?
            .clone()
            .ok_or_else(|| AppError::IndexUnavailable("Tool index has not been built".into()))
    }

    pub fn is_built(&self) -> bool {
        self.table.read().map(|t| t.is_some()).unwrap_or(false)
    }

    /// Number of indexed points, zero before the first build.
    pub fn len(&self) -> usize {
        self.snapshot().map(|t| t.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `name` currently has a point in the index.
    pub fn contains(&self, name: &str) -> bool {
        let id = point_id(name);
        self.snapshot()
            .map(|t| t.entries.iter().any(|e| e.point_id == id))
            .unwrap_or(false)
    }
}
