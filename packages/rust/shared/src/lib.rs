//! Shared types, error model, configuration, and gateway traits for ShopAlly.
//!
//! This crate is the foundation depended on by all other ShopAlly crates.
//! It provides:
//! - [`ShopAllyError`]: the unified error type
//! - Domain types ([`Item`], [`Price`], [`Subscription`], [`PriceQuote`], [`SearchFilters`])
//! - Configuration ([`AppConfig`], [`EnrichmentConfig`], [`AlertScanConfig`], config loading)
//! - Ports ([`CatalogGateway`], [`ContentEnricher`], [`KeyValueCache`], ...) implemented
//!   by the storage and gateways crates and consumed by the core

pub mod config;
pub mod error;
pub mod ports;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AlertScanConfig, AlertsConfig, AppConfig, CatalogConfig, EnrichmentConfig, LlmConfig,
    PushConfig, SearchConfig, StorageConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{Result, ShopAllyError};
pub use ports::{
    CacheExt, CatalogGateway, CompletionClient, ContentEnricher, IntentParser, KeyValueCache,
    NotificationSender, PriceFetcher, SubscriptionStore,
};
pub use types::{
    Enrichment, Item, Price, PriceQuote, RELEVANCE_FLOOR, SearchFilters, Subscription,
    SubscriptionRecord,
};
