//! Marginalia
//!
//! Durable web annotations that survive reloads and host-page rewrites.
//!
//! # Modules
//!
//! - `annotations`: record model and text hashing
//! - `db`: SQLite record store
//! - `dom`: document model the annotations are anchored in
//! - `anchoring`: layered resolver (exact, fuzzy, context)
//! - `html`: marker rendering and removal
//! - `watcher`: debounced and periodic reconciliation triggers
//! - `service`: per-page composition root
//! - `transport`: `{type, payload}` request boundary

pub mod anchoring;
pub mod annotations;
pub mod config;
pub mod db;
pub mod dom;
pub mod error;
pub mod html;
pub mod routes;
pub mod service;
pub mod state;
pub mod transport;
pub mod watcher;

pub use config::Config;
pub use error::{AppError, Result};
pub use service::{AnnotationService, Page, SelectionSnapshot};
