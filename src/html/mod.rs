//! HTML marker rendering
//!
//! Wraps anchored elements in marker elements and removes them again.

mod marker;

pub use marker::{
    inject_markers, InjectionResult, InteractionKind, MarkerEvent, MarkerRenderer, RenderOutcome,
};
