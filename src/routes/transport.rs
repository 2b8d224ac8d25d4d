//! Transport endpoint
//!
//! Carries `{type, payload}` envelopes from other execution contexts. The
//! HTTP status is always 200; failures are reported in the envelope.

use axum::{extract::State, routing::post, Json, Router};

use crate::state::AppState;
use crate::transport::{dispatch, TransportRequest, TransportResponse};

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(handle))
}

async fn handle(
    State(state): State<AppState>,
    Json(request): Json<TransportRequest>,
) -> Json<TransportResponse> {
    tracing::debug!(kind = %request.kind, "Transport request");
    Json(dispatch(state.store(), request).await)
}
