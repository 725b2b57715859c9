pub mod health;
pub mod invoke;
pub mod refresh;
pub mod search;
pub mod tools;

pub use health::{health_handler, ready_handler};
pub use invoke::invoke_handler;
pub use refresh::refresh_handler;
pub use search::search_handler;
pub use tools::{categories_handler, tool_handler, tools_handler};

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// The invocation API without middleware or the metrics endpoint.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/invoke", post(invoke_handler))
        .route("/tools", get(tools_handler))
        .route("/tools/:name", get(tool_handler))
        .route("/categories", get(categories_handler))
        .route("/search", post(search_handler))
        .route("/index/refresh", post(refresh_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}
