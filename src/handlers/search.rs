//! Semantic search over the registered operations.
//!
//! The query is embedded with the same embedder as the index and compared to
//! every operation's canonical-text embedding by cosine similarity.

use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    /// The natural language query to match against operations
    pub query: String,
    /// Number of results; `DEFAULT_SEARCH_LIMIT` when absent, capped at `MAX_SEARCH_LIMIT`
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub name: String,
    /// Cosine similarity, higher is more relevant
    pub score: f32,
    pub category: String,
    pub description: String,
    pub examples: Vec<String>,
    pub keywords: Vec<String>,
}

/// POST /search - Find operations relevant to a natural language query.
///
/// An empty query or a zero limit is a 400; a query against an index that
/// has not been built is a 503.
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start_time = std::time::Instant::now();

    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(AppError::ValidationError("Query cannot be empty".to_string()));
    }

    let limit = request.limit.unwrap_or(state.config.default_search_limit);
    if limit == 0 {
        return Err(AppError::ValidationError("limit must be at least 1".to_string()));
    }
    let limit = limit.min(state.config.max_search_limit);

    // Waits for an embedding permit, then embeds off the async workers.
    let hits = state.index.search(&query, limit).await?;

    let results: Vec<SearchResult> = hits
        .into_iter()
        .map(|hit| SearchResult {
            name: hit.name,
            score: hit.score,
            category: hit.category,
            description: hit.description,
            examples: hit.examples,
            keywords: hit.keywords,
        })
        .collect();

    let total_time = start_time.elapsed();
    tracing::info!(
        query = %query,
        limit,
        results = results.len(),
        total_ms = total_time.as_millis(),
        "Search completed"
    );

    metrics::counter!("search_requests_total").increment(1);
    metrics::histogram!("search_latency_ms").record(total_time.as_millis() as f64);

    Ok(Json(SearchResponse { results }))
}
