//! Annotation record types
//!
//! A record is created from a user selection and must stay meaningful after
//! the page reloads or mutates. Nothing here points at live document nodes:
//! the selector and position are advisory snapshots, while `original_text`
//! and `context` are the evidence the resolver matches against.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hash::{hash_text, verify_hash};
use crate::error::{AppError, Result};

/// Default highlight color
pub const DEFAULT_COLOR: &str = "#ffeb3b";

/// A persisted annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    /// Unique identifier (UUID unless supplied by the caller)
    pub id: String,
    pub url: String,
    pub domain: String,
    /// Structural path captured at creation. Advisory only.
    pub selector: String,
    /// Exact selected text
    pub original_text: String,
    /// `hash_text(original_text)`
    pub text_hash: String,
    #[serde(rename = "type")]
    pub annotation_type: AnnotationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_comment: Option<String>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Geometry at creation, for initial placement only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<BoundingRect>,
    pub context: TextContext,
    pub status: AnnotationStatus,
    pub metadata: PageMetadata,
}

/// Kinds of annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationType {
    /// Colored highlight
    #[default]
    Highlight,
    /// Highlight with a summary and a user comment
    Note,
}

impl AnnotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationType::Highlight => "highlight",
            AnnotationType::Note => "note",
        }
    }
}

impl FromStr for AnnotationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "highlight" => Ok(AnnotationType::Highlight),
            "note" => Ok(AnnotationType::Note),
            other => Err(AppError::Validation(format!(
                "unknown annotation type: {}",
                other
            ))),
        }
    }
}

/// Record lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    #[default]
    Active,
    Archived,
    /// Terminal; purged externally
    Deleted,
}

impl AnnotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationStatus::Active => "active",
            AnnotationStatus::Archived => "archived",
            AnnotationStatus::Deleted => "deleted",
        }
    }

    /// active <-> archived, {active, archived} -> deleted. Staying put is allowed.
    pub fn can_transition_to(self, next: AnnotationStatus) -> bool {
        use AnnotationStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Active, Archived) | (Archived, Active) => true,
            (Active, Deleted) | (Archived, Deleted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AnnotationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(AnnotationStatus::Active),
            "archived" => Ok(AnnotationStatus::Archived),
            "deleted" => Ok(AnnotationStatus::Deleted),
            other => Err(AppError::Validation(format!("unknown status: {}", other))),
        }
    }
}

/// Viewport rectangle of the selection at creation time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BoundingRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Text captured around the selection, used as matching evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TextContext {
    pub before: String,
    pub after: String,
}

impl TextContext {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before.trim().is_empty() && self.after.trim().is_empty()
    }
}

/// Page the record was created on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub page_title: String,
    pub page_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Fields accepted by `RecordStore::create`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NewAnnotation {
    /// Caller-chosen id; generated when absent
    pub id: Option<String>,
    pub url: String,
    pub selector: String,
    pub original_text: String,
    #[serde(rename = "type")]
    pub annotation_type: AnnotationType,
    pub color: Option<String>,
    pub summary: Option<String>,
    pub user_comment: Option<String>,
    pub position: Option<BoundingRect>,
    pub context: TextContext,
    pub status: AnnotationStatus,
    pub metadata: PageMetadata,
    /// When the selection was made; the store's clock when absent
    pub created_at: Option<DateTime<Utc>>,
}

impl NewAnnotation {
    /// A highlight in the default color
    pub fn highlight(url: &str, text: &str) -> Self {
        Self {
            url: url.to_string(),
            original_text: text.to_string(),
            color: Some(DEFAULT_COLOR.to_string()),
            metadata: PageMetadata {
                page_url: url.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// A note carrying a user comment
    pub fn note(url: &str, text: &str, comment: &str) -> Self {
        Self {
            annotation_type: AnnotationType::Note,
            user_comment: Some(comment.to_string()),
            ..Self::highlight(url, text)
        }
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.color = Some(color.to_string());
        self
    }

    pub fn with_context(mut self, before: &str, after: &str) -> Self {
        self.context = TextContext::new(before, after);
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.original_text.trim().is_empty() {
            return Err(AppError::Validation(
                "annotation text must not be empty".to_string(),
            ));
        }
        if self.url.trim().is_empty() {
            return Err(AppError::Validation("annotation url must not be empty".to_string()));
        }
        if self.status == AnnotationStatus::Deleted {
            return Err(AppError::Validation(
                "annotations cannot be created as deleted".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the full record, deriving domain and hash
    pub fn into_record(self, id: String, now: DateTime<Utc>) -> AnnotationRecord {
        let domain = domain_of(&self.url);
        let text_hash = hash_text(&self.original_text);
        AnnotationRecord {
            id,
            url: self.url,
            domain,
            selector: self.selector,
            original_text: self.original_text,
            text_hash,
            annotation_type: self.annotation_type,
            color: self.color,
            summary: self.summary,
            user_comment: self.user_comment,
            timestamp: self.created_at.unwrap_or(now),
            last_modified: now,
            position: self.position,
            context: self.context,
            status: self.status,
            metadata: self.metadata,
        }
    }
}

/// Field replacements for `RecordStore::update`. Each present field replaces
/// the stored value wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnotationPatch {
    pub original_text: Option<String>,
    pub selector: Option<String>,
    pub color: Option<String>,
    pub summary: Option<String>,
    pub user_comment: Option<String>,
    pub position: Option<BoundingRect>,
    pub context: Option<TextContext>,
    pub status: Option<AnnotationStatus>,
    pub metadata: Option<PageMetadata>,
}

impl AnnotationPatch {
    pub fn status(status: AnnotationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn comment(comment: &str) -> Self {
        Self {
            user_comment: Some(comment.to_string()),
            ..Default::default()
        }
    }

    pub fn color(color: &str) -> Self {
        Self {
            color: Some(color.to_string()),
            ..Default::default()
        }
    }

    /// Whether applying this patch can move the record's anchor
    pub fn changes_anchor(&self) -> bool {
        self.original_text.is_some() || self.context.is_some()
    }
}

impl AnnotationRecord {
    /// Recompute the text hash and compare against the stored one
    pub fn verify_integrity(&self) -> bool {
        verify_hash(&self.original_text, &self.text_hash)
    }

    pub fn is_active(&self) -> bool {
        self.status == AnnotationStatus::Active
    }

    /// Apply a patch in place, enforcing status transitions and the hash invariant
    pub fn apply_patch(&mut self, patch: AnnotationPatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(next) = patch.status {
            if !self.status.can_transition_to(next) {
                return Err(AppError::InvalidTransition {
                    from: self.status,
                    to: next,
                });
            }
            self.status = next;
        }
        if let Some(text) = patch.original_text {
            if text.trim().is_empty() {
                return Err(AppError::Validation(
                    "annotation text must not be empty".to_string(),
                ));
            }
            self.text_hash = hash_text(&text);
            self.original_text = text;
        }
        if let Some(selector) = patch.selector {
            self.selector = selector;
        }
        if let Some(color) = patch.color {
            self.color = Some(color);
        }
        if let Some(summary) = patch.summary {
            self.summary = Some(summary);
        }
        if let Some(comment) = patch.user_comment {
            self.user_comment = Some(comment);
        }
        if let Some(position) = patch.position {
            self.position = Some(position);
        }
        if let Some(context) = patch.context {
            self.context = context;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata = metadata;
        }
        self.last_modified = now;
        Ok(())
    }
}

/// Query filters for listing annotations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnotationFilter {
    pub url: Option<String>,
    pub domain: Option<String>,
    pub status: Option<AnnotationStatus>,
    pub text_contains: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AnnotationFilter {
    pub fn for_url(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: AnnotationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

/// Record counts per status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total: u64,
    pub active: u64,
    pub archived: u64,
    pub deleted: u64,
}

/// Lowercased host of a URL, or an empty string when it has none
pub fn domain_of(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use AnnotationStatus::*;
        assert!(Active.can_transition_to(Archived));
        assert!(Archived.can_transition_to(Active));
        assert!(Active.can_transition_to(Deleted));
        assert!(Archived.can_transition_to(Deleted));
        assert!(Active.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Archived));
    }

    #[test]
    fn test_domain_extraction() {
        assert_eq!(domain_of("https://Example.COM/path?q=1"), "example.com");
        assert_eq!(domain_of("http://localhost:8080/"), "localhost");
        assert_eq!(domain_of("not a url"), "");
    }

    #[test]
    fn test_into_record_keeps_selection_time() {
        let selected = Utc::now() - chrono::Duration::seconds(30);
        let now = Utc::now();
        let record = NewAnnotation {
            created_at: Some(selected),
            ..NewAnnotation::highlight("https://a.test/", "text")
        }
        .into_record("r".into(), now);

        assert_eq!(record.timestamp, selected);
        assert_eq!(record.last_modified, now);
    }

    #[test]
    fn test_into_record_derives_hash_and_domain() {
        let now = Utc::now();
        let record = NewAnnotation::highlight("https://news.example.org/a", "hello world")
            .into_record("id-1".to_string(), now);

        assert_eq!(record.domain, "news.example.org");
        assert_eq!(record.text_hash, hash_text("hello world"));
        assert!(record.verify_integrity());
        assert_eq!(record.timestamp, record.last_modified);
        assert_eq!(record.color.as_deref(), Some(DEFAULT_COLOR));
    }

    #[test]
    fn test_apply_patch_rehashes_text() {
        let now = Utc::now();
        let mut record =
            NewAnnotation::highlight("https://a.test/", "first").into_record("r".into(), now);

        let patch = AnnotationPatch {
            original_text: Some("second".to_string()),
            ..Default::default()
        };
        record.apply_patch(patch, now).unwrap();

        assert_eq!(record.original_text, "second");
        assert!(record.verify_integrity());
    }

    #[test]
    fn test_apply_patch_rejects_resurrection() {
        let now = Utc::now();
        let mut record =
            NewAnnotation::highlight("https://a.test/", "text").into_record("r".into(), now);
        record
            .apply_patch(AnnotationPatch::status(AnnotationStatus::Deleted), now)
            .unwrap();

        let err = record
            .apply_patch(AnnotationPatch::status(AnnotationStatus::Active), now)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(record.status, AnnotationStatus::Deleted);
    }

    #[test]
    fn test_patch_replaces_context_wholesale() {
        let now = Utc::now();
        let mut record = NewAnnotation::highlight("https://a.test/", "text")
            .with_context("before ", " after")
            .into_record("r".into(), now);

        let patch = AnnotationPatch {
            context: Some(TextContext::new("new before", "")),
            ..Default::default()
        };
        record.apply_patch(patch, now).unwrap();

        assert_eq!(record.context.before, "new before");
        assert_eq!(record.context.after, "");
    }

    #[test]
    fn test_validate_rejects_empty_text() {
        let ann = NewAnnotation::highlight("https://a.test/", "   ");
        assert!(matches!(ann.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_serialization_uses_camel_case() {
        let record = NewAnnotation::note("https://a.test/", "quoted", "my thoughts")
            .into_record("n-1".into(), Utc::now());

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"originalText\":\"quoted\""));
        assert!(json.contains("\"userComment\":\"my thoughts\""));
        assert!(json.contains("\"type\":\"note\""));
        assert!(json.contains("\"status\":\"active\""));

        let parsed: AnnotationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
