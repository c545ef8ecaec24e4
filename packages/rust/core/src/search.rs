//! End-to-end product search.
//!
//! query → intent → catalog → default order → enrichment → relevance order.

use std::sync::Arc;
use std::time::Duration;

use shopally_shared::{
    AppConfig, CatalogGateway, IntentParser, Item, Result, SearchFilters, ShopAllyError,
};
use tracing::{info, instrument, warn};

use crate::enrichment::{
    EnrichmentContext, EnrichmentOrchestrator, EnrichmentProgress, EnrichmentStats, ItemOutcome,
};
use crate::query::normalize_query_class;
use crate::ranking::RankingEngine;
use crate::scope::Scope;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Callback trait for reporting search progress (used by CLI spinners).
pub trait SearchProgress: Send + Sync {
    /// Called when a new phase starts.
    fn phase(&self, name: &str);
    /// Called once per candidate as enrichment results are collected.
    fn item_enriched(&self, current: usize, total: usize, item_id: &str);
    /// Called when the search completes.
    fn done(&self, result: &SearchResult);
}

/// No-op progress reporter.
pub struct SilentProgress;

impl SearchProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_enriched(&self, _current: usize, _total: usize, _item_id: &str) {}
    fn done(&self, _result: &SearchResult) {}
}

struct SearchEnrichmentProgress<'a>(&'a dyn SearchProgress);

impl EnrichmentProgress for SearchEnrichmentProgress<'_> {
    fn item_finished(&self, current: usize, total: usize, item_id: &str, _outcome: ItemOutcome) {
        self.0.item_enriched(current, total, item_id);
    }
}

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// Requested response language; the service default when `None`.
    pub language: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub items: Vec<Item>,
    /// Filters sent to the catalog, after pruning.
    pub filters: SearchFilters,
    pub keywords: String,
    pub language: String,
    pub query_class: String,
    /// Candidates returned by the catalog.
    pub candidates: usize,
    pub stats: EnrichmentStats,
    /// Nothing could be scored, so the un-enriched candidates were returned.
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct SearchService {
    intent: Arc<dyn IntentParser>,
    catalog: Arc<dyn CatalogGateway>,
    orchestrator: EnrichmentOrchestrator,
    ranking: RankingEngine,
    default_language: String,
    languages: Vec<String>,
    request_timeout: Duration,
}

impl SearchService {
    pub fn new(
        intent: Arc<dyn IntentParser>,
        catalog: Arc<dyn CatalogGateway>,
        orchestrator: EnrichmentOrchestrator,
        config: &AppConfig,
    ) -> Self {
        let ranking = RankingEngine::new(orchestrator.config().relevance_threshold);
        let request_timeout = orchestrator.config().request_timeout;
        Self {
            intent,
            catalog,
            orchestrator,
            ranking,
            default_language: config.search.default_language.clone(),
            languages: config.search.languages.clone(),
            request_timeout,
        }
    }

    /// Run a search under `scope`, bounded by the configured request timeout.
    #[instrument(skip_all, fields(query = %request.query))]
    pub async fn search(
        &self,
        request: &SearchRequest,
        scope: &Scope,
        progress: &dyn SearchProgress,
    ) -> Result<SearchResult> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(ShopAllyError::validation("query is empty"));
        }
        let scope = scope.child_with_timeout(self.request_timeout);

        // --- Intent (soft fallback) ---
        progress.phase("Understanding query");
        let filters = match scope.run(self.intent.parse_intent(query)).await? {
            Ok(filters) => filters,
            Err(e) => {
                warn!(error = %e, "intent parsing failed, using raw query");
                SearchFilters::default()
            }
        }
        .pruned();

        let keywords = filters
            .keywords
            .clone()
            .unwrap_or_else(|| query.to_string());
        let query_class =
            normalize_query_class(filters.query_class.as_deref().unwrap_or(&keywords));
        let language = self.response_language(request, &filters);

        // --- Catalog (fatal) ---
        progress.phase("Fetching products");
        let mut candidates = scope
            .run(self.catalog.fetch_products(&keywords, &filters))
            .await??;
        let candidate_count = candidates.len();
        info!(candidates = candidate_count, %keywords, %language, "catalog fetched");

        self.ranking.apply_default_order(&mut candidates, &filters);

        // --- Enrichment ---
        progress.phase("Enriching products");
        let context = EnrichmentContext {
            query: query.to_string(),
            language: language.clone(),
            query_class: query_class.clone(),
        };
        let (merged, stats) = self
            .orchestrator
            .fan_out(
                candidates,
                &context,
                &scope,
                &SearchEnrichmentProgress(progress),
            )
            .await;

        let degraded = candidate_count > 0 && stats.scored() == 0;
        let items = if degraded {
            warn!(
                failed = stats.failed,
                abandoned = stats.abandoned,
                "no candidate could be scored, returning un-enriched results"
            );
            merged
        } else {
            self.ranking.finalize(merged)
        };

        let result = SearchResult {
            items,
            filters,
            keywords,
            language,
            query_class,
            candidates: candidate_count,
            stats,
            degraded,
        };
        info!(results = result.items.len(), degraded, "search completed");
        progress.done(&result);
        Ok(result)
    }

    /// Requested language, switched to the query's detected language when that
    /// is a supported language other than the default one.
    fn response_language(&self, request: &SearchRequest, filters: &SearchFilters) -> String {
        let requested = request
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.default_language)
            .to_ascii_lowercase();

        match filters.language.as_deref().map(str::to_ascii_lowercase) {
            Some(detected)
                if detected != self.default_language && self.languages.contains(&detected) =>
            {
                detected
            }
            _ => requested,
        }
    }
}
