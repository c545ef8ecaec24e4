//! Concurrent enrichment orchestrator.
//!
//! Fans one task out per candidate, bounded by a counting semaphore, with a
//! shared token bucket in front of every enricher call. Results land in an
//! index-addressed slot vector so completion order never affects output order.

use std::sync::Arc;

use shopally_shared::{CacheExt, ContentEnricher, EnrichmentConfig, Item, KeyValueCache};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::query::cache_key;
use crate::rate_limit::RateLimiter;
use crate::ranking::RankingEngine;
use crate::scope::Scope;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// How a single candidate left the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    CacheHit,
    Enriched,
    Removed,
    Failed,
    Abandoned,
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheHit => "cache_hit",
            Self::Enriched => "enriched",
            Self::Removed => "removed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Callback trait for reporting enrichment progress.
pub trait EnrichmentProgress: Send + Sync {
    /// Called once per candidate during fan-in, in candidate order.
    fn item_finished(&self, current: usize, total: usize, item_id: &str, outcome: ItemOutcome);
}

/// No-op progress reporter.
pub struct SilentEnrichmentProgress;

impl EnrichmentProgress for SilentEnrichmentProgress {
    fn item_finished(&self, _current: usize, _total: usize, _item_id: &str, _outcome: ItemOutcome) {}
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Per-batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub cache_hits: usize,
    pub enriched: usize,
    pub removed: usize,
    pub failed: usize,
    pub abandoned: usize,
    /// Rate-limited calls that were retried.
    pub retries: usize,
}

impl EnrichmentStats {
    /// Candidates that received a relevance verdict.
    pub fn scored(&self) -> usize {
        self.cache_hits + self.enriched + self.removed
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::CacheHit => self.cache_hits += 1,
            ItemOutcome::Enriched => self.enriched += 1,
            ItemOutcome::Removed => self.removed += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// Output of [`EnrichmentOrchestrator::enrich`].
#[derive(Debug, Clone)]
pub struct EnrichmentReport {
    /// Relevant items, most relevant first.
    pub items: Vec<Item>,
    pub stats: EnrichmentStats,
}

/// What every task in one batch needs to know about the request.
#[derive(Debug, Clone)]
pub struct EnrichmentContext {
    pub query: String,
    pub language: String,
    pub query_class: String,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Shared {
    enricher: Arc<dyn ContentEnricher>,
    cache: Arc<dyn KeyValueCache>,
    limiter: RateLimiter,
    semaphore: Arc<Semaphore>,
    config: EnrichmentConfig,
}

enum Outcome {
    CacheHit(Item),
    Enriched(Item),
    Removed,
    Failed(Item),
    Abandoned(Item),
}

impl Outcome {
    fn kind(&self) -> ItemOutcome {
        match self {
            Self::CacheHit(_) => ItemOutcome::CacheHit,
            Self::Enriched(_) => ItemOutcome::Enriched,
            Self::Removed => ItemOutcome::Removed,
            Self::Failed(_) => ItemOutcome::Failed,
            Self::Abandoned(_) => ItemOutcome::Abandoned,
        }
    }

    fn into_item(self) -> Option<Item> {
        match self {
            Self::CacheHit(item)
            | Self::Enriched(item)
            | Self::Failed(item)
            | Self::Abandoned(item) => Some(item),
            Self::Removed => None,
        }
    }
}

/// Long-lived enrichment engine. The semaphore and rate limiter are shared by
/// every batch run through the same orchestrator.
pub struct EnrichmentOrchestrator {
    shared: Arc<Shared>,
    ranking: RankingEngine,
}

impl EnrichmentOrchestrator {
    pub fn new(
        enricher: Arc<dyn ContentEnricher>,
        cache: Arc<dyn KeyValueCache>,
        config: EnrichmentConfig,
    ) -> Self {
        let limiter = RateLimiter::new(config.requests_per_second, config.burst);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let ranking = RankingEngine::new(config.relevance_threshold);
        Self {
            shared: Arc::new(Shared {
                enricher,
                cache,
                limiter,
                semaphore,
                config,
            }),
            ranking,
        }
    }

    pub fn config(&self) -> &EnrichmentConfig {
        &self.shared.config
    }

    /// Enrich, filter and order `items`.
    pub async fn enrich(
        &self,
        items: Vec<Item>,
        context: &EnrichmentContext,
        scope: &Scope,
        progress: &dyn EnrichmentProgress,
    ) -> EnrichmentReport {
        let (merged, stats) = self.fan_out(items, context, scope, progress).await;
        EnrichmentReport {
            items: self.ranking.finalize(merged),
            stats,
        }
    }

    /// Enrich every candidate concurrently and merge the survivors back in
    /// their original order, without filtering or sorting.
    ///
    /// Items that failed or were abandoned come back un-enriched; removed
    /// items are dropped.
    #[instrument(skip_all, fields(items = items.len(), lang = %context.language))]
    pub async fn fan_out(
        &self,
        items: Vec<Item>,
        context: &EnrichmentContext,
        scope: &Scope,
        progress: &dyn EnrichmentProgress,
    ) -> (Vec<Item>, EnrichmentStats) {
        let total = items.len();
        let context = Arc::new(context.clone());
        let mut slots: Vec<Option<Item>> = vec![None; total];
        let mut ids: Vec<String> = Vec::with_capacity(total);
        let mut handles = Vec::with_capacity(total);

        for (idx, item) in items.into_iter().enumerate() {
            ids.push(item.id.clone());
            let shared = self.shared.clone();
            let context = context.clone();
            let scope = scope.child();

            handles.push(tokio::spawn(async move {
                let permit = match scope.run(shared.semaphore.clone().acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_closed)) => return (idx, Outcome::Failed(item), 0),
                    Err(_cancelled) => return (idx, Outcome::Abandoned(item), 0),
                };
                let (outcome, retries) = enrich_one(&shared, item, &context, &scope).await;
                drop(permit);
                (idx, outcome, retries)
            }));
        }

        // Fan-in: wait for every task; order of arrival does not matter.
        let mut stats = EnrichmentStats::default();
        for (n, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok((idx, outcome, retries)) => {
                    let kind = outcome.kind();
                    stats.record(kind);
                    stats.retries += retries;
                    progress.item_finished(n + 1, total, &ids[idx], kind);
                    slots[idx] = outcome.into_item();
                }
                Err(e) => {
                    warn!(item_id = %ids[n], error = %e, "enrichment task panicked");
                    stats.record(ItemOutcome::Failed);
                    progress.item_finished(n + 1, total, &ids[n], ItemOutcome::Failed);
                }
            }
        }

        info!(
            cache_hits = stats.cache_hits,
            enriched = stats.enriched,
            removed = stats.removed,
            failed = stats.failed,
            abandoned = stats.abandoned,
            retries = stats.retries,
            "enrichment completed"
        );

        (slots.into_iter().flatten().collect(), stats)
    }
}

/// Cache-aside enrichment of a single item with bounded rate-limit retries.
/// Returns the outcome and the number of retries spent.
async fn enrich_one(
    shared: &Shared,
    item: Item,
    context: &EnrichmentContext,
    scope: &Scope,
) -> (Outcome, usize) {
    let key = cache_key(&item.id, &context.language, &context.query_class);

    match scope.run(shared.cache.get_typed::<Item>(&key)).await {
        Err(_) => return (Outcome::Abandoned(item), 0),
        Ok(Ok(Some(cached))) => {
            debug!(item_id = %item.id, "enrichment cache hit");
            return (Outcome::CacheHit(cached), 0);
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => warn!(item_id = %item.id, error = %e, "cache read failed, treating as miss"),
    }

    let max_retries = shared.config.max_retries as usize;
    let mut retries = 0;
    let enrichment = loop {
        if shared.limiter.acquire(scope).await.is_err() {
            return (Outcome::Abandoned(item), retries);
        }
        let call = shared
            .enricher
            .enrich(&item, &context.query, &context.language);
        match scope.run(call).await {
            Err(_) => return (Outcome::Abandoned(item), retries),
            Ok(Ok(enrichment)) => break enrichment,
            Ok(Err(e)) if e.is_rate_limited() && retries < max_retries => {
                retries += 1;
                let backoff = shared.config.retry_backoff * retries as u32;
                debug!(
                    item_id = %item.id,
                    retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "rate limited, backing off"
                );
                if scope.sleep(backoff).await.is_err() {
                    return (Outcome::Abandoned(item), retries);
                }
            }
            Ok(Err(e)) => {
                warn!(item_id = %item.id, error = %e, "enrichment failed, keeping original");
                return (Outcome::Failed(item), retries);
            }
        }
    };

    if enrichment.forces_removal() {
        debug!(item_id = %item.id, score = enrichment.relevance_score, "item removed");
        return (Outcome::Removed, retries);
    }

    let enriched = item.apply_enrichment(enrichment);
    let write = shared
        .cache
        .set_typed(&key, &enriched, Some(shared.config.cache_ttl));
    match scope.run(write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(item_id = %enriched.id, error = %e, "cache write failed"),
        Err(_) => debug!(item_id = %enriched.id, "cache write skipped, scope ended"),
    }
    (Outcome::Enriched(enriched), retries)
}
