//! Marker rendering over the document model
//!
//! A resolved record is shown by wrapping its anchor element in a marker
//! element that carries the record id in a reserved attribute. Unwrapping
//! puts the original element back exactly where it was. The renderer keeps
//! a map from record id to wrapper node; the map is rebuilt every session
//! and is never treated as the source of truth.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::anchoring::{Anchor, AnchorResolver};
use crate::annotations::{AnnotationRecord, AnnotationType};
use crate::config::MarkerConfig;
use crate::dom::{Document, NodeId};
use crate::error::{DomError, RenderError};

const EVENT_CAPACITY: usize = 64;

/// Host events forwarded to a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Hover,
}

/// Emitted when the user interacts with a marker. Carries a snapshot of the
/// record; listeners decide what to do with it.
#[derive(Debug, Clone)]
pub struct MarkerEvent {
    pub kind: InteractionKind,
    pub record: AnnotationRecord,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(NodeId),
    /// The record already had a marker; nothing changed
    AlreadyRendered(NodeId),
}

impl RenderOutcome {
    pub fn wrapper(&self) -> NodeId {
        match self {
            RenderOutcome::Rendered(id) | RenderOutcome::AlreadyRendered(id) => *id,
        }
    }
}

#[derive(Debug, Clone)]
struct Binding {
    wrapper: NodeId,
    element: NodeId,
    record: AnnotationRecord,
    confidence: f64,
}

pub struct MarkerRenderer {
    config: MarkerConfig,
    bindings: HashMap<String, Binding>,
    events: broadcast::Sender<MarkerEvent>,
}

impl MarkerRenderer {
    pub fn new(config: MarkerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            bindings: HashMap::new(),
            events,
        }
    }

    pub fn config(&self) -> &MarkerConfig {
        &self.config
    }

    /// Listen for marker interactions
    pub fn subscribe(&self) -> broadcast::Receiver<MarkerEvent> {
        self.events.subscribe()
    }

    /// Wrap the anchor element in a marker, at most once per record id
    pub fn render(
        &mut self,
        doc: &mut Document,
        record: &AnnotationRecord,
        anchor: &Anchor,
    ) -> Result<RenderOutcome, RenderError> {
        if let Some(binding) = self.bindings.get(&record.id) {
            return Ok(RenderOutcome::AlreadyRendered(binding.wrapper));
        }

        let element = anchor.element;
        if !doc.is_element(element) {
            return Err(RenderError::NotAnElement);
        }
        if !doc.is_attached(element) || doc.parent(element).is_none() {
            return Err(RenderError::Detached);
        }

        let wrapper = doc.create_element(&self.config.tag);
        for (name, value) in marker_attributes(record, anchor.confidence, &self.config) {
            doc.set_attr(wrapper, &name, &value);
        }
        doc.wrap(element, wrapper)
            .map_err(|_| RenderError::Detached)?;

        self.bindings.insert(
            record.id.clone(),
            Binding {
                wrapper,
                element,
                record: record.clone(),
                confidence: anchor.confidence,
            },
        );

        tracing::debug!(id = %record.id, tier = ?anchor.tier, "Marker rendered");
        Ok(RenderOutcome::Rendered(wrapper))
    }

    /// Remove a record's marker and put the wrapped element back.
    ///
    /// Without a binding, wrappers are found through the reserved attribute.
    /// Returns whether anything was unwrapped.
    pub fn unrender(&mut self, doc: &mut Document, record_id: &str) -> bool {
        let wrappers = match self.bindings.remove(record_id) {
            Some(binding) => vec![binding.wrapper],
            None => doc.find_by_attribute(&self.config.id_attribute, record_id),
        };

        let mut unwrapped = false;
        for wrapper in wrappers {
            if doc.attr(wrapper, &self.config.id_attribute) == Some(record_id) && doc.unwrap(wrapper)
            {
                unwrapped = true;
            }
        }

        if unwrapped {
            tracing::debug!(id = record_id, "Marker removed");
        }
        unwrapped
    }

    /// Unwrap every bound marker. Returns how many were removed.
    pub fn unrender_all(&mut self, doc: &mut Document) -> usize {
        let ids: Vec<String> = self.bindings.keys().cloned().collect();
        ids.iter()
            .filter(|id| self.unrender(doc, id))
            .count()
    }

    /// Unwrap markers left in the document by an earlier session. They carry
    /// the reserved attribute but have no binding here.
    pub fn clear_orphans(&mut self, doc: &mut Document) -> usize {
        let orphans: Vec<NodeId> = doc
            .descendants(doc.root())
            .filter(|&id| {
                doc.tag_name(id) == Some(self.config.tag.as_str())
                    && doc
                        .attr(id, &self.config.id_attribute)
                        .is_some_and(|rid| self.wrapper_of(rid) != Some(id))
            })
            .collect();

        let cleared = orphans.into_iter().filter(|&id| doc.unwrap(id)).count();
        if cleared > 0 {
            tracing::debug!(cleared, "Removed orphaned markers");
        }
        cleared
    }

    /// Forget a binding whose wrapper is already gone from the document
    pub fn forget(&mut self, record_id: &str) -> bool {
        self.bindings.remove(record_id).is_some()
    }

    pub fn is_bound(&self, record_id: &str) -> bool {
        self.bindings.contains_key(record_id)
    }

    pub fn bound_ids(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn wrapper_of(&self, record_id: &str) -> Option<NodeId> {
        self.bindings.get(record_id).map(|b| b.wrapper)
    }

    pub fn element_of(&self, record_id: &str) -> Option<NodeId> {
        self.bindings.get(record_id).map(|b| b.element)
    }

    /// Whether the marker is still in the document and still wraps its element.
    ///
    /// Other records' markers may sit between the two when records share an
    /// element; any other node in between means the host moved things.
    pub fn binding_is_live(&self, doc: &Document, record_id: &str) -> bool {
        self.bindings.get(record_id).is_some_and(|b| {
            doc.is_attached(b.wrapper)
                && doc.attr(b.wrapper, &self.config.id_attribute) == Some(record_id)
                && self.wraps_through_markers(doc, b.wrapper, b.element)
        })
    }

    fn wraps_through_markers(&self, doc: &Document, wrapper: NodeId, element: NodeId) -> bool {
        let mut current = doc.parent(element);
        while let Some(id) = current {
            if id == wrapper {
                return true;
            }
            if doc.attr(id, &self.config.id_attribute).is_none() {
                return false;
            }
            current = doc.parent(id);
        }
        false
    }

    /// Refresh the record snapshot and presentation of a bound marker
    pub fn refresh(&mut self, doc: &mut Document, record: &AnnotationRecord) -> bool {
        let Some(binding) = self.bindings.get_mut(&record.id) else {
            return false;
        };
        doc.remove_attr(binding.wrapper, "title");
        doc.remove_attr(binding.wrapper, "style");
        for (name, value) in marker_attributes(record, binding.confidence, &self.config) {
            doc.set_attr(binding.wrapper, &name, &value);
        }
        binding.record = record.clone();
        true
    }

    /// Route a host event on any node to the nearest enclosing marker.
    ///
    /// Nested markers resolve to the innermost one.
    pub fn interact(
        &self,
        doc: &Document,
        node: NodeId,
        kind: InteractionKind,
    ) -> Option<MarkerEvent> {
        let mut current = Some(node);
        while let Some(id) = current {
            if let Some(record_id) = doc.attr(id, &self.config.id_attribute) {
                if let Some(binding) = self.bindings.get(record_id) {
                    if binding.wrapper == id {
                        let event = MarkerEvent {
                            kind,
                            record: binding.record.clone(),
                            confidence: binding.confidence,
                        };
                        // No listeners is fine
                        let _ = self.events.send(event.clone());
                        return Some(event);
                    }
                }
            }
            current = doc.parent(id);
        }
        None
    }
}

/// Attributes written on a marker element
fn marker_attributes(
    record: &AnnotationRecord,
    confidence: f64,
    config: &MarkerConfig,
) -> Vec<(String, String)> {
    let type_name = record.annotation_type.as_str();
    let mut attrs = vec![
        (config.id_attribute.clone(), record.id.clone()),
        (config.type_attribute.clone(), type_name.to_string()),
        (
            "class".to_string(),
            format!(
                "{} {}-{}",
                config.class_prefix, config.class_prefix, type_name
            ),
        ),
        ("data-confidence".to_string(), format!("{:.2}", confidence)),
        ("tabindex".to_string(), "0".to_string()),
    ];

    if config.include_inline_styles {
        if let Some(color) = record.color.as_deref() {
            attrs.push((
                "style".to_string(),
                format!("background-color: {}; cursor: pointer;", color),
            ));
        }
    }

    if record.annotation_type == AnnotationType::Note {
        let tooltip = record
            .user_comment
            .as_deref()
            .or(record.summary.as_deref());
        if let Some(tooltip) = tooltip {
            attrs.push(("title".to_string(), tooltip.to_string()));
        }
    }

    attrs
}

/// Result of marker injection into an HTML string
#[derive(Debug)]
pub struct InjectionResult {
    /// The processed HTML with marker elements
    pub html: String,
    /// Number of markers successfully injected
    pub injected_count: usize,
    /// Active records that could not be anchored
    pub failed_annotations: Vec<String>,
}

/// Resolve and mark every active record in an HTML page.
///
/// The server-side counterpart of a reconciliation pass: parse once, collect
/// candidates once, then resolve and render each record in turn.
pub fn inject_markers(
    html: &str,
    records: &[AnnotationRecord],
    resolver: &AnchorResolver,
    config: &MarkerConfig,
) -> Result<InjectionResult, DomError> {
    let active: Vec<&AnnotationRecord> = records.iter().filter(|r| r.is_active()).collect();
    if active.is_empty() {
        return Ok(InjectionResult {
            html: html.to_string(),
            injected_count: 0,
            failed_annotations: vec![],
        });
    }

    let mut doc = Document::parse_html(html)?;
    let candidates = resolver.candidates(&doc);
    let mut renderer = MarkerRenderer::new(config.clone());

    let mut injected_count = 0;
    let mut failed_annotations = Vec::new();

    for record in active {
        let rendered = resolver
            .resolve(record, &candidates)
            .map(|anchor| renderer.render(&mut doc, record, &anchor));

        match rendered {
            Some(Ok(RenderOutcome::Rendered(_))) => injected_count += 1,
            Some(Ok(RenderOutcome::AlreadyRendered(_))) => {}
            Some(Err(e)) => {
                tracing::warn!(id = %record.id, error = %e, "Marker injection failed");
                failed_annotations.push(record.id.clone());
            }
            None => failed_annotations.push(record.id.clone()),
        }
    }

    Ok(InjectionResult {
        html: doc.to_html(),
        injected_count,
        failed_annotations,
    })
}
