//! Annotation module
//!
//! The durable data model for web annotations.
//!
//! # Features
//!
//! - Highlight and note records keyed by an opaque id
//! - Text identity via a normalized content hash
//! - Context windows captured around the selection as matching evidence
//! - Status lifecycle: active <-> archived, then deleted (terminal)

mod hash;
mod types;

pub use hash::{hash_text, normalize_text, verify_hash};
pub use types::{
    domain_of, AnnotationFilter, AnnotationPatch, AnnotationRecord, AnnotationStatus,
    AnnotationType, BoundingRect, NewAnnotation, PageMetadata, StoreStats, TextContext,
    DEFAULT_COLOR,
};
