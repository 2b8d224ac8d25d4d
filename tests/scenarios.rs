//! End-to-end reanchoring scenarios through the annotation service

use std::sync::Arc;
use std::time::Duration;

use marginalia::anchoring::{AnchorResolver, MatchTier};
use marginalia::annotations::{AnnotationFilter, NewAnnotation};
use marginalia::config::{Config, DatabaseConfig};
use marginalia::db::RecordStore;
use marginalia::service::{AnnotationAttributes, AnnotationService, Page, SelectionSnapshot};

const URL: &str = "https://example.com/post";

fn config() -> Config {
    let mut config = Config::default();
    config.database = DatabaseConfig::in_memory();
    config
}

fn page(html: &str) -> Arc<Page> {
    Arc::new(Page::from_html(URL, html).unwrap())
}

async fn service_on(html: &str, store: &RecordStore) -> AnnotationService {
    let service = AnnotationService::new(config(), page(html));
    service.initialize_with_store(store.clone()).await.unwrap();
    service
}

fn marker_confidence(service: &AnnotationService, id: &str) -> Option<String> {
    let marker = service.marker_of(id)?;
    service
        .page()
        .read(|doc| doc.attr(marker, "data-confidence").map(str::to_string))
}

#[tokio::test]
async fn reload_rerenders_with_full_confidence() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.database.url = format!("sqlite:{}", dir.path().join("annotations.db").display());
    let html = "<body><h1>Post</h1><p>hello world</p></body>";

    let first = AnnotationService::new(config.clone(), page(html));
    first.initialize().await.unwrap();
    let record = first
        .create_annotation(
            &SelectionSnapshot::from_text("hello world"),
            AnnotationAttributes::highlight(),
        )
        .await
        .unwrap();
    first.destroy().await;

    // Fresh page, store handle and resolver
    let second = AnnotationService::new(config, page(html));
    let report = second.initialize().await.unwrap();

    assert_eq!(report.resolved, 1);
    assert!(second.is_rendered(&record.id));
    assert_eq!(marker_confidence(&second, &record.id).as_deref(), Some("1.00"));
}

#[tokio::test]
async fn restructured_text_still_matches_exactly() {
    let store = RecordStore::open(&DatabaseConfig::in_memory()).await.unwrap();
    let original = service_on("<body><p>intro text</p><p>hello world</p></body>", &store).await;
    let record = original
        .create_annotation(
            &SelectionSnapshot::from_text("hello world"),
            AnnotationAttributes::highlight(),
        )
        .await
        .unwrap();
    original.destroy().await;

    let html = "<body><p>intro text</p><div><section><span>hello world</span></section></div></body>";
    let resolver = AnchorResolver::new(&config().anchoring, &config().markers.id_attribute);
    let anchor = page(html)
        .read(|doc| resolver.resolve_in(doc, &record))
        .unwrap();
    assert_eq!(anchor.tier, MatchTier::Exact);
    assert_eq!(anchor.confidence, 1.0);

    let reloaded = service_on(html, &store).await;
    assert!(reloaded.is_rendered(&record.id));
    let marker = reloaded.marker_of(&record.id).unwrap();
    let wrapped = reloaded
        .page()
        .read(|doc| doc.tag_name(doc.children(marker)[0]).map(str::to_string));
    assert_eq!(wrapped.as_deref(), Some("span"));
}

#[tokio::test]
async fn punctuation_rewrite_falls_back_to_fuzzy() {
    let store = RecordStore::open(&DatabaseConfig::in_memory()).await.unwrap();
    let record = store
        .create(NewAnnotation::highlight(URL, "hello world"))
        .await
        .unwrap();

    let html = "<body><p>intro</p><p>hello, world!</p></body>";
    let resolver = AnchorResolver::new(&config().anchoring, &config().markers.id_attribute);
    let anchor = page(html)
        .read(|doc| resolver.resolve_in(doc, &record))
        .unwrap();
    assert_eq!(anchor.tier, MatchTier::Fuzzy);
    assert!(anchor.confidence > 0.7);
    assert!(anchor.confidence < 1.0);

    let service = service_on(html, &store).await;
    assert!(service.is_rendered(&record.id));
    assert_eq!(marker_confidence(&service, &record.id).as_deref(), Some("0.85"));
}

#[tokio::test]
async fn delete_restores_parent_children() {
    let store = RecordStore::open(&DatabaseConfig::in_memory()).await.unwrap();
    let service = service_on("<body><h1>Title</h1><p>hello world</p><p>after</p></body>", &store).await;

    let body = service.page().read(|doc| doc.body());
    let before = service.page().read(|doc| doc.children(body).to_vec());

    let record = service
        .create_annotation(
            &SelectionSnapshot::from_text("hello world"),
            AnnotationAttributes::highlight(),
        )
        .await
        .unwrap();
    let during = service.page().read(|doc| doc.children(body).to_vec());
    assert_ne!(during, before);

    service.delete_annotation(&record.id).await.unwrap();
    let after = service.page().read(|doc| doc.children(body).to_vec());
    assert_eq!(after, before);
}

#[tokio::test]
async fn watcher_renders_after_host_inserts_text() {
    let store = RecordStore::open(&DatabaseConfig::in_memory()).await.unwrap();
    let record = store
        .create(NewAnnotation::highlight(URL, "late arriving paragraph"))
        .await
        .unwrap();

    let mut config = config();
    config.watcher.debounce_ms = 20;
    config.watcher.interval_ms = 60_000;
    let service = AnnotationService::new(config, page("<body><p>loading</p></body>"));
    let report = service.initialize_with_store(store.clone()).await.unwrap();
    assert_eq!(report.unresolved, 1);

    let body = service.page().read(|doc| doc.body());
    service.page().mutate(|doc| {
        doc.append_element_with_text(body, "p", "late arriving paragraph")
            .unwrap();
    });

    let mut rendered = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if service.is_rendered(&record.id) {
            rendered = true;
            break;
        }
    }
    assert!(rendered);
    service.destroy().await;
}

#[tokio::test]
async fn pagination_is_stable_across_pages() {
    let store = RecordStore::open(&DatabaseConfig::in_memory()).await.unwrap();
    for i in 0..25 {
        store
            .create(NewAnnotation::highlight(URL, &format!("passage {}", i)))
            .await
            .unwrap();
    }

    let all = store.query(&AnnotationFilter::for_url(URL)).await.unwrap();
    let first = store
        .query(&AnnotationFilter::for_url(URL).page(10, 0))
        .await
        .unwrap();
    let second = store
        .query(&AnnotationFilter::for_url(URL).page(10, 10))
        .await
        .unwrap();

    assert_eq!(first.len(), 10);
    assert_eq!(second, all[10..20].to_vec());
    assert!(first.iter().all(|r| !second.iter().any(|s| s.id == r.id)));
}
