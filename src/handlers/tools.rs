use crate::capabilities::discovery::category_counts;
use crate::error::{AppError, Result};
use crate::registry::OperationDescriptor;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

/// GET /tools - Every registered descriptor, in registration order.
pub async fn tools_handler(State(state): State<Arc<AppState>>) -> Json<Vec<OperationDescriptor>> {
    Json(state.registry.descriptors())
}

/// GET /tools/:name
pub async fn tool_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<OperationDescriptor>> {
    state
        .registry
        .descriptor(&name)
        .cloned()
        .map(Json)
        .ok_or(AppError::UnknownOperation(name))
}

/// GET /categories - Tool count per category, sorted by name.
pub async fn categories_handler(State(state): State<Arc<AppState>>) -> Json<Vec<CategoryCount>> {
    Json(
        category_counts(state.context.catalog())
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect(),
    )
}
