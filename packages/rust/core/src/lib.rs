//! Core pipeline orchestration and domain logic for ShopAlly.
//!
//! This crate ties the ports from `shopally-shared` into the two workflows:
//! product search with concurrent enrichment ([`search::SearchService`]) and
//! the periodic price-drop scan ([`alerts::AlertScanner`]).

pub mod alerts;
pub mod enrichment;
pub mod prices;
pub mod query;
pub mod rate_limit;
pub mod ranking;
pub mod scope;
pub mod search;

pub use alerts::{AlertScanner, ScanPhase, TickReport};
pub use enrichment::{
    EnrichmentContext, EnrichmentOrchestrator, EnrichmentProgress, EnrichmentReport,
    EnrichmentStats, SilentEnrichmentProgress,
};
pub use prices::PriceService;
pub use query::{cache_key, normalize_query_class};
pub use rate_limit::RateLimiter;
pub use ranking::RankingEngine;
pub use scope::Scope;
pub use search::{SearchProgress, SearchRequest, SearchResult, SearchService, SilentProgress};
