use crate::error::Result;
use crate::state::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// POST /index/refresh - Re-embed every registered operation.
pub async fn refresh_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let start = std::time::Instant::now();
    let indexed = state.refresh_index().await?;

    tracing::info!(indexed, elapsed_ms = start.elapsed().as_millis() as u64, "Index refreshed");
    Ok(Json(json!({ "indexed": indexed })))
}
