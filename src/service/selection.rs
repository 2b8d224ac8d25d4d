//! Selection snapshots and the anchoring evidence derived from them

use chrono::{DateTime, Utc};

use crate::annotations::{normalize_text, BoundingRect, TextContext};
use crate::dom::{Document, NodeId};

/// Character offsets into the rendered text of a container node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRange {
    pub container: NodeId,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Everything needed to create a record from a user selection.
///
/// The host copies this out of its live selection; nothing here is assumed
/// to stay valid after the create call returns.
#[derive(Debug, Clone)]
pub struct SelectionSnapshot {
    pub text: String,
    pub range: Option<SelectionRange>,
    pub bounding_rect: Option<BoundingRect>,
    pub timestamp: DateTime<Utc>,
}

impl SelectionSnapshot {
    /// A selection with no geometry; context is searched for in the page body
    pub fn from_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            range: None,
            bounding_rect: None,
            timestamp: Utc::now(),
        }
    }

    pub fn in_container(mut self, container: NodeId, start_offset: usize, end_offset: usize) -> Self {
        self.range = Some(SelectionRange {
            container,
            start_offset,
            end_offset,
        });
        self
    }

    pub fn with_rect(mut self, rect: BoundingRect) -> Self {
        self.bounding_rect = Some(rect);
        self
    }
}

/// Selector and context captured at creation time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedEvidence {
    pub selector: String,
    pub context: TextContext,
}

/// Derive the advisory selector and up to `window` chars of context on each
/// side of the selection. Falls back to the first occurrence in the body when
/// the range is missing, detached or does not hold the selected text.
pub fn capture_evidence(doc: &Document, snapshot: &SelectionSnapshot, window: usize) -> CapturedEvidence {
    let range = snapshot
        .range
        .filter(|r| doc.is_attached(r.container));
    let container = range.map(|r| r.container).unwrap_or_else(|| doc.body());

    let element = if doc.is_element(container) {
        Some(container)
    } else {
        doc.parent(container).filter(|&p| doc.is_element(p))
    };
    let selector = element
        .map(|e| doc.structural_path(e))
        .unwrap_or_default();

    let haystack: Vec<char> = doc.text_content(container).chars().collect();
    let Some((start, end)) = locate(&haystack, snapshot, range) else {
        tracing::debug!(selector = %selector, "Selection text not found in container");
        return CapturedEvidence {
            selector,
            context: TextContext::default(),
        };
    };

    let before: String = haystack[start.saturating_sub(window)..start].iter().collect();
    let after: String = haystack[end..(end + window).min(haystack.len())]
        .iter()
        .collect();

    CapturedEvidence {
        selector,
        context: TextContext::new(before, after),
    }
}

/// Char offsets of the selection inside `haystack`
fn locate(
    haystack: &[char],
    snapshot: &SelectionSnapshot,
    range: Option<SelectionRange>,
) -> Option<(usize, usize)> {
    if let Some(r) = range {
        if r.start_offset <= r.end_offset && r.end_offset <= haystack.len() {
            let slice: String = haystack[r.start_offset..r.end_offset].iter().collect();
            if normalize_text(&slice) == normalize_text(&snapshot.text) {
                return Some((r.start_offset, r.end_offset));
            }
        }
    }

    let needle: Vec<char> = snapshot.text.chars().collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|w| w == needle.as_slice())
        .map(|start| (start, start + needle.len()))
}
