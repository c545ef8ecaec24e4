//! Gateway traits at the seams between the pipeline and the outside world.
//!
//! The core crate depends only on these traits; concrete adapters live in the
//! storage (libSQL, in-memory) and gateways (HTTP) crates.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, ShopAllyError};
use crate::types::{Enrichment, Item, SearchFilters, SubscriptionRecord};

/// Upstream product catalog.
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    /// Fetch candidate items for `keywords` narrowed by `filters`.
    async fn fetch_products(&self, keywords: &str, filters: &SearchFilters) -> Result<Vec<Item>>;
}

/// Turns a free-text query into a normalized filter map.
#[async_trait]
pub trait IntentParser: Send + Sync {
    async fn parse_intent(&self, query: &str) -> Result<SearchFilters>;
}

/// Rewrites an item's text for a query and scores its relevance.
#[async_trait]
pub trait ContentEnricher: Send + Sync {
    /// Enrich `item` for the user's original `query`, writing text in `language`.
    ///
    /// Rate-limit conditions must surface as errors for which
    /// [`ShopAllyError::is_rate_limited`] is true.
    async fn enrich(&self, item: &Item, query: &str, language: &str) -> Result<Enrichment>;
}

/// Opaque text-completion model used by the LLM-backed parser and enricher.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// String key-value cache with per-entry TTL.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Get a live value; expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Store a value; `None` TTL means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Typed JSON helpers over any [`KeyValueCache`].
#[async_trait]
pub trait CacheExt: KeyValueCache {
    /// Get and decode a JSON value. Undecodable content is a cache error.
    async fn get_typed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| ShopAllyError::Cache(format!("undecodable value at {key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Encode a value as JSON and store it.
    async fn set_typed<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value)
            .map_err(|e| ShopAllyError::Cache(format!("unencodable value for {key}: {e}")))?;
        self.set(key, &raw, ttl).await
    }
}

impl<C: KeyValueCache + ?Sized> CacheExt for C {}

/// Current-price lookup for a chunk of items.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Return base-currency prices keyed by item id. Ids missing from the map
    /// were not found upstream.
    async fn fetch_prices(&self, item_ids: &[String]) -> Result<HashMap<String, f64>>;
}

/// Push-notification transport.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Send one message, returning the transport's message id.
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<String>;
}

/// Persistent subscription repository as seen by the alert scanner.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Next page of active subscriptions ordered by id, strictly after `after`.
    async fn active_page(&self, after: Option<&str>, limit: usize)
    -> Result<Vec<SubscriptionRecord>>;

    /// Lower the stored reference price of an active subscription.
    ///
    /// Returns `false` (and writes nothing) when the subscription is inactive,
    /// missing, or `new_price` is not below the stored price.
    async fn lower_reference_price(&self, id: &str, new_price: f64) -> Result<bool>;
}
