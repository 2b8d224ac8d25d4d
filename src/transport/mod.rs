//! Request/response boundary between execution contexts
//!
//! A request is `{type, payload}`; the response is `{success, data}` or
//! `{success: false, error: {code, message}}`. One handler per operation.
//! Reads are idempotent; creates are not deduplicated.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::annotations::{AnnotationFilter, AnnotationPatch, NewAnnotation};
use crate::db::RecordStore;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl TransportRequest {
    pub fn new(kind: &str, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TransportError>,
}

impl TransportResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(TransportError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

impl From<AppError> for TransportResponse {
    fn from(err: AppError) -> Self {
        TransportResponse::failure(err.error_code(), err.public_message())
    }
}

/// Operations understood by `dispatch`
pub const OPERATIONS: &[&str] = &["create", "get", "update", "delete", "query", "stats"];

#[derive(Debug, Deserialize)]
struct IdPayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UpdatePayload {
    id: String,
    #[serde(default)]
    patch: AnnotationPatch,
}

/// Route one request to its handler. Never fails; errors come back inside
/// the response.
pub async fn dispatch(store: &RecordStore, request: TransportRequest) -> TransportResponse {
    let result = match request.kind.as_str() {
        "create" => handle_create(store, request.payload).await,
        "get" => handle_get(store, request.payload).await,
        "update" => handle_update(store, request.payload).await,
        "delete" => handle_delete(store, request.payload).await,
        "query" => handle_query(store, request.payload).await,
        "stats" => handle_stats(store).await,
        other => {
            tracing::debug!(kind = other, "Unknown transport operation");
            return TransportResponse::failure(
                "unknown_operation",
                format!("Unknown operation: {}", other),
            );
        }
    };

    match result {
        Ok(data) => TransportResponse::ok(data),
        Err(e) => {
            if e.is_internal() {
                tracing::error!(kind = %request.kind, error = %e, "Transport request failed");
            } else {
                tracing::debug!(kind = %request.kind, error = %e, "Transport request failed");
            }
            e.into()
        }
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| AppError::Validation(format!("invalid payload: {}", e)))
}

async fn handle_create(store: &RecordStore, payload: Value) -> Result<Value> {
    let data: NewAnnotation = parse(payload)?;
    let record = store.create(data).await?;
    Ok(serde_json::to_value(record)?)
}

async fn handle_get(store: &RecordStore, payload: Value) -> Result<Value> {
    let IdPayload { id } = parse(payload)?;
    let record = store
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {}", id)))?;
    Ok(serde_json::to_value(record)?)
}

async fn handle_update(store: &RecordStore, payload: Value) -> Result<Value> {
    let UpdatePayload { id, patch } = parse(payload)?;
    let record = store.update(&id, patch).await?;
    Ok(serde_json::to_value(record)?)
}

async fn handle_delete(store: &RecordStore, payload: Value) -> Result<Value> {
    let IdPayload { id } = parse(payload)?;
    store.delete(&id).await?;
    Ok(json!({ "id": id }))
}

async fn handle_query(store: &RecordStore, payload: Value) -> Result<Value> {
    let filter: AnnotationFilter = if payload.is_null() {
        AnnotationFilter::default()
    } else {
        parse(payload)?
    };
    let items = store.query(&filter).await?;
    let total = store.count(&filter).await?;
    Ok(json!({ "items": items, "total": total }))
}

async fn handle_stats(store: &RecordStore) -> Result<Value> {
    Ok(serde_json::to_value(store.stats().await?)?)
}
