mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeCatalog, FakeEnricher, FakeIntent, item};
use parking_lot::Mutex;
use shopally_core::{
    EnrichmentOrchestrator, Scope, SearchProgress, SearchRequest, SearchResult, SearchService,
    SilentProgress,
};
use shopally_shared::{AppConfig, EnrichmentConfig, SearchFilters, ShopAllyError};
use shopally_storage::MemoryCache;

struct Harness {
    service: SearchService,
    enricher: Arc<FakeEnricher>,
    catalog: Arc<FakeCatalog>,
}

fn harness(intent: FakeIntent, catalog: FakeCatalog, enricher: FakeEnricher) -> Harness {
    let mut config = AppConfig::default();
    config.search.requests_per_second = 1000.0;
    config.search.burst = 100;

    let enricher = Arc::new(enricher);
    let catalog = Arc::new(catalog);
    let orchestrator = EnrichmentOrchestrator::new(
        enricher.clone(),
        Arc::new(MemoryCache::new()),
        EnrichmentConfig::from(&config),
    );
    let service = SearchService::new(Arc::new(intent), catalog.clone(), orchestrator, &config);
    Harness {
        service,
        enricher,
        catalog,
    }
}

fn phone_catalog() -> FakeCatalog {
    FakeCatalog::new(vec![
        item("1", 4.8, 95.0),
        item("2", 4.0, 70.0),
        item("3", 4.9, 99.0),
    ])
}

fn keywords(words: &str) -> SearchFilters {
    SearchFilters {
        keywords: Some(words.to_string()),
        ..SearchFilters::default()
    }
}

fn ids(items: &[shopally_shared::Item]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
}

/// Records the candidate order reported during fan-in.
#[derive(Default)]
struct OrderRecorder(Mutex<Vec<String>>);

impl SearchProgress for OrderRecorder {
    fn phase(&self, _name: &str) {}
    fn item_enriched(&self, _current: usize, _total: usize, item_id: &str) {
        self.0.lock().push(item_id.to_string());
    }
    fn done(&self, _result: &SearchResult) {}
}

#[tokio::test]
async fn phone_search_ranks_by_relevance() {
    let h = harness(
        FakeIntent(Some(keywords("phone"))),
        phone_catalog(),
        FakeEnricher::new()
            .score("1", 40)
            .score("2", 90)
            .score("3", 20),
    );

    let recorder = OrderRecorder::default();
    let result = h
        .service
        .search(&SearchRequest::new("phone"), &Scope::new(), &recorder)
        .await
        .unwrap();

    assert_eq!(*recorder.0.lock(), ["3", "1", "2"]);
    assert_eq!(ids(&result.items), ["2", "1"]);
    assert_eq!(result.items[0].relevance, 90);
    assert_eq!(result.items[1].relevance, 40);
    assert_eq!(result.candidates, 3);
    assert_eq!(result.stats.removed, 1);
    assert!(!result.degraded);
    assert_eq!(result.language, "en");
    assert_eq!(result.query_class, "phone");
}

#[tokio::test]
async fn degraded_search_returns_default_order() {
    let h = harness(
        FakeIntent(Some(keywords("phone"))),
        phone_catalog(),
        FakeEnricher::new().fail("1").fail("2").fail("3"),
    );

    let result = h
        .service
        .search(&SearchRequest::new("phone"), &Scope::new(), &SilentProgress)
        .await
        .unwrap();

    assert!(result.degraded);
    assert_eq!(ids(&result.items), ["3", "1", "2"]);
    assert_eq!(result.stats.failed, 3);
}

#[tokio::test]
async fn price_constraint_keeps_upstream_order() {
    let filters = SearchFilters {
        max_price: Some(200.0),
        ..keywords("phone")
    };
    let h = harness(
        FakeIntent(Some(filters)),
        phone_catalog(),
        FakeEnricher::new().fail("1").fail("2").fail("3"),
    );

    let result = h
        .service
        .search(&SearchRequest::new("phone under 200"), &Scope::new(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(ids(&result.items), ["1", "2", "3"]);
    let requests = h.catalog.requests();
    assert_eq!(requests[0].0, "phone");
    assert_eq!(requests[0].1.max_price, Some(200.0));
}

#[tokio::test]
async fn intent_failure_falls_back_to_raw_query() {
    let h = harness(FakeIntent(None), phone_catalog(), FakeEnricher::new());

    let result = h
        .service
        .search(&SearchRequest::new("  Cheap Phone "), &Scope::new(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(result.keywords, "Cheap Phone");
    assert_eq!(result.query_class, "cheap phone");
    assert_eq!(h.catalog.requests()[0].0, "Cheap Phone");
    assert_eq!(result.items.len(), 3);
}

#[tokio::test]
async fn blank_intent_fields_are_pruned() {
    let filters = SearchFilters {
        keywords: Some("  ".into()),
        language: Some(String::new()),
        ..SearchFilters::default()
    };
    let h = harness(FakeIntent(Some(filters)), phone_catalog(), FakeEnricher::new());

    let result = h
        .service
        .search(&SearchRequest::new("phone"), &Scope::new(), &SilentProgress)
        .await
        .unwrap();

    assert_eq!(result.keywords, "phone");
    assert_eq!(result.filters.keywords, None);
    assert_eq!(result.filters.language, None);
}

#[tokio::test]
async fn detected_amharic_overrides_requested_language() {
    let filters = SearchFilters {
        language: Some("am".into()),
        ..keywords("ስልክ")
    };
    let h = harness(FakeIntent(Some(filters)), phone_catalog(), FakeEnricher::new());

    let result = h
        .service
        .search(
            &SearchRequest::new("ስልክ").with_language("en"),
            &Scope::new(),
            &SilentProgress,
        )
        .await
        .unwrap();

    assert_eq!(result.language, "am");
    assert!(h.enricher.calls().iter().all(|c| c.language == "am"));
}

#[tokio::test]
async fn unsupported_detected_language_is_ignored() {
    let filters = SearchFilters {
        language: Some("fr".into()),
        ..keywords("phone")
    };
    let h = harness(FakeIntent(Some(filters)), phone_catalog(), FakeEnricher::new());

    let result = h
        .service
        .search(
            &SearchRequest::new("phone").with_language("am"),
            &Scope::new(),
            &SilentProgress,
        )
        .await
        .unwrap();

    assert_eq!(result.language, "am");
}

#[tokio::test]
async fn catalog_failure_fails_search() {
    let h = harness(
        FakeIntent(Some(keywords("phone"))),
        FakeCatalog::failing(),
        FakeEnricher::new(),
    );

    let err = h
        .service
        .search(&SearchRequest::new("phone"), &Scope::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, ShopAllyError::Network(_)));
    assert_eq!(h.enricher.call_count(), 0);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let h = harness(FakeIntent(None), phone_catalog(), FakeEnricher::new());

    let err = h
        .service
        .search(&SearchRequest::new("   "), &Scope::new(), &SilentProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, ShopAllyError::Validation { .. }));
    assert!(h.catalog.requests().is_empty());
}

#[tokio::test]
async fn empty_catalog_is_not_degraded() {
    let h = harness(
        FakeIntent(Some(keywords("phone"))),
        FakeCatalog::new(Vec::new()),
        FakeEnricher::new(),
    );

    let result = h
        .service
        .search(&SearchRequest::new("phone"), &Scope::new(), &SilentProgress)
        .await
        .unwrap();

    assert!(result.items.is_empty());
    assert!(!result.degraded);
}

#[tokio::test(start_paused = true)]
async fn cancelled_search_returns_unenriched_candidates() {
    let h = harness(
        FakeIntent(Some(keywords("phone"))),
        phone_catalog(),
        FakeEnricher::new().delay(Duration::from_secs(60)),
    );
    let scope = Scope::with_timeout(Duration::from_secs(2));

    let result = h
        .service
        .search(&SearchRequest::new("phone"), &scope, &SilentProgress)
        .await
        .unwrap();

    assert!(result.degraded);
    assert_eq!(result.stats.abandoned, 3);
    assert_eq!(ids(&result.items), ["3", "1", "2"]);
}
