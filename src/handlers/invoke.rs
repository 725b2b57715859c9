use crate::dispatch::{Envelope, InvocationRequest};
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::{extract::State, Json};
use std::sync::Arc;

/// POST /invoke - Run one operation by name.
///
/// Always answers 200; success or failure is carried by the envelope. A body
/// that is not a valid invocation request is reported as a `ValidationError`
/// envelope.
pub async fn invoke_handler(
    State(state): State<Arc<AppState>>,
    request: Result<Json<InvocationRequest>, JsonRejection>,
) -> Json<Envelope> {
    match request {
        Ok(Json(request)) => Json(state.dispatcher.invoke_request(request).await),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected invocation body");
            Json(Envelope::failure(&AppError::ValidationError(rejection.body_text())))
        }
    }
}
