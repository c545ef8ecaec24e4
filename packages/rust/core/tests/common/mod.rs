//! In-memory fakes for the core ports.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shopally_shared::{
    CatalogGateway, ContentEnricher, Enrichment, IntentParser, Item, NotificationSender,
    PriceFetcher, Result, SearchFilters, ShopAllyError, SubscriptionRecord, SubscriptionStore,
};
use tokio::time::Instant;

pub fn item(id: &str, rating: f64, seller_score: f64) -> Item {
    Item {
        rating,
        seller_score,
        ..Item::new(id, format!("Item {id}"))
    }
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EnrichCall {
    pub item_id: String,
    pub language: String,
    pub at: Instant,
}

/// Scripted enricher. Scores default to 80; every call takes `delay`.
#[derive(Default)]
pub struct FakeEnricher {
    scores: HashMap<String, u8>,
    failing: HashSet<String>,
    rate_limited: Mutex<HashMap<String, usize>>,
    delay: Duration,
    calls: Mutex<Vec<EnrichCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(mut self, item_id: &str, score: u8) -> Self {
        self.scores.insert(item_id.to_string(), score);
        self
    }

    pub fn fail(mut self, item_id: &str) -> Self {
        self.failing.insert(item_id.to_string());
        self
    }

    /// Answer the first `times` calls for `item_id` with a rate-limit error.
    pub fn rate_limit(self, item_id: &str, times: usize) -> Self {
        self.rate_limited.lock().insert(item_id.to_string(), times);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<EnrichCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentEnricher for FakeEnricher {
    async fn enrich(&self, item: &Item, _query: &str, language: &str) -> Result<Enrichment> {
        self.calls.lock().push(EnrichCall {
            item_id: item.id.clone(),
            language: language.to_string(),
            at: Instant::now(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(left) = self.rate_limited.lock().get_mut(&item.id) {
            if *left > 0 {
                *left -= 1;
                return Err(ShopAllyError::RateLimited("429 Too Many Requests".into()));
            }
        }
        if self.failing.contains(&item.id) {
            return Err(ShopAllyError::Enrichment("model returned garbage".into()));
        }

        Ok(Enrichment {
            title: format!("{} [{language}]", item.title),
            description: format!("About {}", item.id),
            highlights: vec!["Fast shipping".into()],
            relevance_score: self.scores.get(&item.id).copied().unwrap_or(80),
            remove: false,
        })
    }
}

// ---------------------------------------------------------------------------
// Catalog and intent
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCatalog {
    items: Vec<Item>,
    fail: bool,
    requests: Mutex<Vec<(String, SearchFilters)>>,
}

impl FakeCatalog {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<(String, SearchFilters)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CatalogGateway for FakeCatalog {
    async fn fetch_products(&self, keywords: &str, filters: &SearchFilters) -> Result<Vec<Item>> {
        self.requests
            .lock()
            .push((keywords.to_string(), filters.clone()));
        if self.fail {
            return Err(ShopAllyError::Network("catalog unreachable".into()));
        }
        Ok(self.items.clone())
    }
}

/// Returns fixed filters, or an error when built with `None`.
pub struct FakeIntent(pub Option<SearchFilters>);

#[async_trait]
impl IntentParser for FakeIntent {
    async fn parse_intent(&self, _query: &str) -> Result<SearchFilters> {
        self.0
            .clone()
            .ok_or_else(|| ShopAllyError::parse("intent model unavailable"))
    }
}

// ---------------------------------------------------------------------------
// Prices, notifications, subscriptions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakePrices {
    prices: Mutex<HashMap<String, f64>>,
    requests: Mutex<Vec<Vec<String>>>,
    fail: AtomicBool,
}

impl FakePrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, item_id: &str, price: f64) {
        self.prices.lock().insert(item_id.to_string(), price);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PriceFetcher for FakePrices {
    async fn fetch_prices(&self, item_ids: &[String]) -> Result<HashMap<String, f64>> {
        self.requests.lock().push(item_ids.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ShopAllyError::Network("price lookup failed".into()));
        }
        let prices = self.prices.lock();
        Ok(item_ids
            .iter()
            .filter_map(|id| prices.get(id).map(|p| (id.clone(), *p)))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Sent>>,
    fail: bool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<String> {
        if self.fail {
            return Err(ShopAllyError::Notification("push service down".into()));
        }
        let mut sent = self.sent.lock();
        sent.push(Sent {
            token: token.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data: data.clone(),
        });
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Subscription store keyed by id, with an active flag per record.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<String, (SubscriptionRecord, bool)>>,
    page_calls: AtomicUsize,
    fail_pages: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: &str, token: &str, item_id: &str, price: f64) {
        self.rows.lock().insert(
            id.to_string(),
            (
                SubscriptionRecord {
                    id: id.to_string(),
                    owner_token: token.to_string(),
                    item_id: item_id.to_string(),
                    title: format!("Product {item_id}"),
                    reference_price: price,
                },
                true,
            ),
        );
    }

    pub fn deactivate(&self, id: &str) {
        if let Some(row) = self.rows.lock().get_mut(id) {
            row.1 = false;
        }
    }

    pub fn reference_price(&self, id: &str) -> Option<f64> {
        self.rows.lock().get(id).map(|(rec, _)| rec.reference_price)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail_pages.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn active_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SubscriptionRecord>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pages.load(Ordering::SeqCst) {
            return Err(ShopAllyError::Storage("database is locked".into()));
        }
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|(id, (_, active))| *active && after.is_none_or(|a| id.as_str() > a))
            .take(limit)
            .map(|(_, (rec, _))| rec.clone())
            .collect())
    }

    async fn lower_reference_price(&self, id: &str, new_price: f64) -> Result<bool> {
        let mut rows = self.rows.lock();
        match rows.get_mut(id) {
            Some((rec, true)) if rec.reference_price > new_price => {
                rec.reference_price = new_price;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
