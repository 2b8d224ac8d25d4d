//! Error types for Marginalia

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::annotations::AnnotationStatus;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Store setup failed. Fatal for the session, never retried.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Annotation store is not initialized")]
    NotInitialized,

    #[error("Annotation service has been destroyed")]
    Destroyed,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AnnotationStatus,
        to: AnnotationStatus,
    },

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Document error: {0}")]
    Document(#[from] DomError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Marker insertion failures. Logged per record, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("anchor element is detached from the document")]
    Detached,

    #[error("anchor node is not an element")]
    NotAnElement,
}

/// Document model errors
#[derive(Error, Debug)]
pub enum DomError {
    #[error("HTML parsing failed: {0}")]
    Parse(String),

    #[error("node cannot be inserted into itself or its descendants")]
    HierarchyRequest,
}

impl AppError {
    /// Stable machine-readable code used by the transport boundary
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Initialization(_) => "initialization_error",
            AppError::NotInitialized => "not_initialized",
            AppError::Destroyed => "destroyed",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Render(_) => "render_error",
            AppError::Document(_) => "document_error",
            AppError::Database(_) => "database_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::Validation(_) | AppError::Document(_) | AppError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotInitialized | AppError::Destroyed => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Initialization(_) | AppError::Render(_) | AppError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Failures on our side rather than the caller's
    pub fn is_internal(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Initialization(_))
    }

    /// Message safe to hand back to a caller. Store internals stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(_) => "Database error".to_string(),
            AppError::Initialization(_) => "Annotation store failed to initialize".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_internal() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(ErrorResponse {
            error: self.error_code().to_string(),
            message: self.public_message(),
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
