//! Annotation service
//!
//! The composition root for one page context. Owns the store handle, the
//! resolver, the marker renderer and the change watcher, and is the only
//! surface callers use to create, edit and display annotations.

mod page;
mod selection;

pub use page::Page;
pub use selection::{capture_evidence, CapturedEvidence, SelectionRange, SelectionSnapshot};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::anchoring::AnchorResolver;
use crate::annotations::{
    AnnotationFilter, AnnotationPatch, AnnotationRecord, AnnotationStatus, AnnotationType,
    NewAnnotation, PageMetadata, StoreStats, DEFAULT_COLOR,
};
use crate::config::Config;
use crate::db::RecordStore;
use crate::dom::{Document, NodeId};
use crate::error::{AppError, Result};
use crate::html::{InteractionKind, MarkerEvent, MarkerRenderer, RenderOutcome};
use crate::watcher::{ChangeWatcher, Reconcile, Trigger, WatcherHandle};

/// Presentation fields supplied alongside a selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnotationAttributes {
    /// Caller-chosen id; generated when absent
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub annotation_type: AnnotationType,
    pub color: Option<String>,
    pub summary: Option<String>,
    pub user_comment: Option<String>,
    pub user_id: Option<String>,
}

impl AnnotationAttributes {
    pub fn highlight() -> Self {
        Self::default()
    }

    pub fn note(comment: &str) -> Self {
        Self {
            annotation_type: AnnotationType::Note,
            user_comment: Some(comment.to_string()),
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.color = Some(color.to_string());
        self
    }
}

/// Outcome counts of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Newly rendered this pass
    pub resolved: usize,
    /// Active records that already had a live marker
    pub already_bound: usize,
    /// No tier cleared its threshold
    pub unresolved: usize,
    /// Resolved but the marker could not be inserted
    pub failed: usize,
    /// Bindings dropped because the record left the active set or the host
    /// removed the marker
    pub pruned: usize,
    /// Records whose text hash no longer verifies
    pub skipped: usize,
}

/// One annotation service per page context. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct AnnotationService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: Config,
    page: Arc<Page>,
    resolver: AnchorResolver,
    store: RwLock<Option<RecordStore>>,
    // Lock order: renderer before the page document
    renderer: Mutex<MarkerRenderer>,
    watcher: Mutex<Option<WatcherHandle>>,
    in_flight: AtomicBool,
    destroyed: AtomicBool,
}

/// Clears the in-flight flag when a pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AnnotationService {
    pub fn new(config: Config, page: Arc<Page>) -> Self {
        let resolver = AnchorResolver::new(&config.anchoring, &config.markers.id_attribute);
        let renderer = MarkerRenderer::new(config.markers.clone());

        Self {
            inner: Arc::new(ServiceInner {
                config,
                page,
                resolver,
                store: RwLock::new(None),
                renderer: Mutex::new(renderer),
                watcher: Mutex::new(None),
                in_flight: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.inner.page
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.store.read().is_some()
    }

    /// Open the store from config, start watching and run a first pass.
    ///
    /// Store setup failures come back as `AppError::Initialization` and are
    /// not retried.
    pub async fn initialize(&self) -> Result<ReconcileReport> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(AppError::Destroyed);
        }
        let store = RecordStore::open(&self.inner.config.database).await?;
        self.initialize_with_store(store).await
    }

    /// Same as `initialize`, with an already opened store
    pub async fn initialize_with_store(&self, store: RecordStore) -> Result<ReconcileReport> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(AppError::Destroyed);
        }

        {
            let mut slot = self.inner.store.write();
            if slot.is_some() {
                return Err(AppError::Initialization(
                    "annotation service is already initialized".to_string(),
                ));
            }
            *slot = Some(store);
        }

        {
            let mut renderer = self.inner.renderer.lock();
            let mut doc = self.inner.page.lock();
            renderer.clear_orphans(&mut doc);
        }

        let handle = ChangeWatcher::spawn(
            &self.inner.config.watcher,
            self.inner.page.subscribe(),
            Arc::downgrade(&self.inner),
        );
        *self.inner.watcher.lock() = Some(handle);

        tracing::info!(url = %self.inner.page.url(), "Annotation service initialized");
        self.inner.reconcile().await
    }

    /// Stop watching, remove every marker and release bindings. Stored data
    /// is left untouched. Safe to call more than once.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = self.inner.watcher.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        let removed = {
            let mut renderer = self.inner.renderer.lock();
            let mut doc = self.inner.page.lock();
            renderer.unrender_all(&mut doc)
        };

        tracing::info!(url = %self.inner.page.url(), removed, "Annotation service destroyed");
    }

    /// Persist a record for the selection and try to show it right away
    pub async fn create_annotation(
        &self,
        snapshot: &SelectionSnapshot,
        attributes: AnnotationAttributes,
    ) -> Result<AnnotationRecord> {
        let store = self.inner.store()?;
        if snapshot.text.trim().is_empty() {
            return Err(AppError::Validation(
                "selection text must not be empty".to_string(),
            ));
        }

        let page = &self.inner.page;
        let evidence = page.read(|doc| {
            capture_evidence(doc, snapshot, self.inner.config.anchoring.context_window)
        });

        let color = match (attributes.color, attributes.annotation_type) {
            (Some(color), _) => Some(color),
            (None, AnnotationType::Highlight) => Some(DEFAULT_COLOR.to_string()),
            (None, AnnotationType::Note) => None,
        };

        let record = store
            .create(NewAnnotation {
                id: attributes.id,
                url: page.url().to_string(),
                selector: evidence.selector,
                original_text: snapshot.text.clone(),
                annotation_type: attributes.annotation_type,
                color,
                summary: attributes.summary,
                user_comment: attributes.user_comment,
                position: snapshot.bounding_rect,
                context: evidence.context,
                status: AnnotationStatus::Active,
                metadata: PageMetadata {
                    page_title: page.title().to_string(),
                    page_url: page.url().to_string(),
                    user_id: attributes.user_id,
                },
                created_at: Some(snapshot.timestamp),
            })
            .await?;

        self.inner.sync_marker(&record, false);
        Ok(record)
    }

    /// Apply a patch. Markers follow the new state: an anchor-moving change
    /// re-resolves, leaving the active set unrenders.
    pub async fn update_annotation(
        &self,
        id: &str,
        patch: AnnotationPatch,
    ) -> Result<AnnotationRecord> {
        let store = self.inner.store()?;
        let reanchor = patch.changes_anchor();
        let record = store.update(id, patch).await?;

        self.inner.sync_marker(&record, reanchor);
        Ok(record)
    }

    /// Remove the record from the store, then its marker
    pub async fn delete_annotation(&self, id: &str) -> Result<()> {
        let store = self.inner.store()?;
        store.delete(id).await?;

        if !self.inner.destroyed.load(Ordering::Acquire) {
            let mut renderer = self.inner.renderer.lock();
            let mut doc = self.inner.page.lock();
            renderer.unrender(&mut doc, id);
        }
        Ok(())
    }

    pub async fn get_annotation(&self, id: &str) -> Result<AnnotationRecord> {
        self.inner
            .store()?
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {}", id)))
    }

    /// Every non-deleted record for this page, newest first
    pub async fn list_for_current_page(&self) -> Result<Vec<AnnotationRecord>> {
        let records = self
            .inner
            .store()?
            .query(&AnnotationFilter::for_url(self.inner.page.url()))
            .await?;
        Ok(records
            .into_iter()
            .filter(|r| r.status != AnnotationStatus::Deleted)
            .collect())
    }

    pub async fn search(&self, filter: &AnnotationFilter) -> Result<Vec<AnnotationRecord>> {
        self.inner.store()?.query(filter).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.inner.store()?.stats().await
    }

    /// Run a reconciliation pass now
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.inner.reconcile().await
    }

    /// Forward a host event on `node` to the enclosing marker, if any
    pub fn interact(&self, node: NodeId, kind: InteractionKind) -> Option<MarkerEvent> {
        let renderer = self.inner.renderer.lock();
        let doc = self.inner.page.lock();
        if !doc.owns(node) {
            return None;
        }
        renderer.interact(&doc, node, kind)
    }

    /// Marker interaction events
    pub fn subscribe(&self) -> broadcast::Receiver<MarkerEvent> {
        self.inner.renderer.lock().subscribe()
    }

    /// Whether the record currently has a live marker in the page
    pub fn is_rendered(&self, id: &str) -> bool {
        let renderer = self.inner.renderer.lock();
        let doc = self.inner.page.lock();
        renderer.binding_is_live(&doc, id)
    }

    /// Wrapper node of a rendered record
    pub fn marker_of(&self, id: &str) -> Option<NodeId> {
        let renderer = self.inner.renderer.lock();
        let doc = self.inner.page.lock();
        renderer
            .wrapper_of(id)
            .filter(|_| renderer.binding_is_live(&doc, id))
    }
}

impl ServiceInner {
    fn store(&self) -> Result<RecordStore> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(AppError::Destroyed);
        }
        self.store.read().clone().ok_or(AppError::NotInitialized)
    }

    async fn reconcile(&self) -> Result<ReconcileReport> {
        let store = self.store()?;

        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("Reconciliation already in flight, skipping");
            return Ok(ReconcileReport::default());
        }
        let _guard = PassGuard(&self.in_flight);

        let records = store
            .query(&AnnotationFilter::for_url(self.page.url()))
            .await?;

        self.apply_pass(&records)
    }

    /// The synchronous half of a pass: prune, resolve, render
    fn apply_pass(&self, records: &[AnnotationRecord]) -> Result<ReconcileReport> {
        let mut renderer = self.renderer.lock();
        if self.destroyed.load(Ordering::Acquire) {
            return Err(AppError::Destroyed);
        }
        let mut doc = self.page.lock();
        let mut report = ReconcileReport::default();

        let active: Vec<&AnnotationRecord> = records.iter().filter(|r| r.is_active()).collect();

        for id in renderer.bound_ids() {
            let still_active = active.iter().any(|r| r.id == id);
            if !still_active || !renderer.binding_is_live(&doc, &id) {
                if !renderer.unrender(&mut doc, &id) {
                    renderer.forget(&id);
                }
                report.pruned += 1;
            }
        }

        let candidates = self.resolver.candidates(&doc);

        for record in active {
            if renderer.is_bound(&record.id) {
                report.already_bound += 1;
                continue;
            }
            if !record.verify_integrity() {
                tracing::warn!(id = %record.id, "Text hash mismatch, skipping annotation");
                report.skipped += 1;
                continue;
            }

            let Some(anchor) = self.resolver.resolve(record, &candidates) else {
                report.unresolved += 1;
                continue;
            };

            match renderer.render(&mut doc, record, &anchor) {
                Ok(RenderOutcome::Rendered(_)) => report.resolved += 1,
                Ok(RenderOutcome::AlreadyRendered(_)) => report.already_bound += 1,
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "Failed to render marker");
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            url = %self.page.url(),
            resolved = report.resolved,
            already_bound = report.already_bound,
            unresolved = report.unresolved,
            failed = report.failed,
            pruned = report.pruned,
            skipped = report.skipped,
            "Reconciliation pass complete"
        );
        Ok(report)
    }

    /// Bring one record's marker in line with its stored state
    fn sync_marker(&self, record: &AnnotationRecord, reanchor: bool) {
        let mut renderer = self.renderer.lock();
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let mut doc = self.page.lock();

        let bound = renderer.is_bound(&record.id);
        if bound && (reanchor || !record.is_active()) {
            renderer.unrender(&mut doc, &record.id);
        } else if bound {
            renderer.refresh(&mut doc, record);
            return;
        }

        if record.is_active() {
            render_one(&self.resolver, &mut renderer, &mut doc, record);
        }
    }
}

fn render_one(
    resolver: &AnchorResolver,
    renderer: &mut MarkerRenderer,
    doc: &mut Document,
    record: &AnnotationRecord,
) {
    let Some(anchor) = resolver.resolve_in(doc, record) else {
        // Picked up again by the next pass
        return;
    };
    if let Err(e) = renderer.render(doc, record, &anchor) {
        tracing::warn!(id = %record.id, error = %e, "Failed to render marker");
    }
}

#[async_trait]
impl Reconcile for ServiceInner {
    async fn on_trigger(&self, trigger: Trigger) {
        match self.reconcile().await {
            Ok(report) => {
                if report.resolved > 0 || report.pruned > 0 {
                    tracing::debug!(
                        ?trigger,
                        resolved = report.resolved,
                        pruned = report.pruned,
                        "Markers updated"
                    );
                }
            }
            Err(AppError::Destroyed) => {}
            Err(e) => tracing::error!(?trigger, error = %e, "Reconciliation failed"),
        }
    }
}
