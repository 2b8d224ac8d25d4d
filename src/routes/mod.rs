//! Route modules for Marginalia Server

pub mod annotations;
pub mod health;
pub mod render;
pub mod transport;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1/health", health::router())
        .nest("/api/v1/annotations", annotations::router())
        .nest("/api/v1/transport", transport::router())
        .nest("/api/v1/render", render::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
