//! Server-side marker rendering
//!
//! Takes page HTML plus its URL and returns the HTML with markers for every
//! active record stored against that URL.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::annotations::{AnnotationFilter, AnnotationStatus};
use crate::error::{AppError, Result};
use crate::html::inject_markers;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    pub url: String,
    pub html: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderResponse {
    pub html: String,
    pub injected_count: usize,
    pub failed_annotations: Vec<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(render_page))
}

async fn render_page(
    State(state): State<AppState>,
    Json(request): Json<RenderRequest>,
) -> Result<Json<RenderResponse>> {
    if request.url.trim().is_empty() {
        return Err(AppError::Validation("url must not be empty".to_string()));
    }

    let filter = AnnotationFilter::for_url(&request.url).with_status(AnnotationStatus::Active);
    let records = state.store().query(&filter).await?;

    let result = inject_markers(
        &request.html,
        &records,
        state.resolver(),
        &state.config().markers,
    )?;

    tracing::debug!(
        url = %request.url,
        injected = result.injected_count,
        failed = result.failed_annotations.len(),
        "Rendered markers"
    );

    Ok(Json(RenderResponse {
        html: result.html,
        injected_count: result.injected_count,
        failed_annotations: result.failed_annotations,
    }))
}
