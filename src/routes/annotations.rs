//! Annotations API routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::annotations::{
    AnnotationFilter, AnnotationPatch, AnnotationRecord, NewAnnotation, StoreStats,
};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the annotations router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_annotations).post(create_annotation))
        .route("/stats", get(annotation_stats))
        .route(
            "/:id",
            get(get_annotation)
                .patch(update_annotation)
                .delete(delete_annotation),
        )
}

/// List annotations matching the query string filter
async fn list_annotations(
    State(state): State<AppState>,
    Query(filter): Query<AnnotationFilter>,
) -> Result<Json<Vec<AnnotationRecord>>> {
    let records = state.store().query(&filter).await?;
    Ok(Json(records))
}

/// Create a new annotation
async fn create_annotation(
    State(state): State<AppState>,
    Json(data): Json<NewAnnotation>,
) -> Result<(StatusCode, Json<AnnotationRecord>)> {
    let record = state.store().create(data).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Get a specific annotation
async fn get_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnnotationRecord>> {
    let record = state
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {}", id)))?;
    Ok(Json(record))
}

/// Update an annotation
async fn update_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<AnnotationPatch>,
) -> Result<Json<AnnotationRecord>> {
    let record = state.store().update(&id, patch).await?;
    Ok(Json(record))
}

/// Delete an annotation
async fn delete_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.store().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Counts per status
async fn annotation_stats(State(state): State<AppState>) -> Result<Json<StoreStats>> {
    Ok(Json(state.store().stats().await?))
}
