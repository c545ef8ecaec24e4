//! Core domain types for ShopAlly listings and price-watch subscriptions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Enrichment scores strictly below this force removal of the item.
pub const RELEVANCE_FLOOR: u8 = 30;

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// Price of a listing in the base currency (USD) and the local currency (ETB).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub usd: f64,
    /// Converted amount; 0 when no FX rate was available.
    pub etb: f64,
    /// When the conversion was made.
    pub fx_timestamp: DateTime<Utc>,
}

/// A product listing as fetched from the catalog and optionally enriched.
///
/// `id` is stable across fetch and enrichment. Enrichment may only replace the
/// text fields and the relevance/removal pair, see [`Item::apply_enrichment`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub price: Price,
    /// Product rating on a 0–5 scale.
    #[serde(default)]
    pub rating: f64,
    /// Seller trust score on a 0–100 scale.
    #[serde(default)]
    pub seller_score: f64,
    #[serde(default)]
    pub delivery_estimate: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub deeplink_url: String,
    #[serde(default)]
    pub tax_rate: f64,
    /// Discount percentage.
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub number_sold: u64,
    /// Relevance to the query, 0–100; 0 until enriched.
    #[serde(default)]
    pub relevance: u8,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub remove: bool,
}

impl Item {
    /// Create a bare item with the given identifier and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Build the enriched copy of this item.
    ///
    /// Only `title`, `description`, `highlights`, `relevance` and `remove` come
    /// from the enrichment; every other field is carried over from `self`. An
    /// empty title in the enrichment keeps the original one.
    pub fn apply_enrichment(&self, enrichment: Enrichment) -> Item {
        let mut enriched = self.clone();
        if !enrichment.title.trim().is_empty() {
            enriched.title = enrichment.title;
        }
        enriched.description = enrichment.description;
        enriched.highlights = enrichment.highlights;
        enriched.relevance = enrichment.relevance_score.min(100);
        enriched.remove = enrichment.remove;
        enriched
    }
}

/// Structured result of a content enrichment call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    pub relevance_score: u8,
    #[serde(default)]
    pub remove: bool,
}

impl Enrichment {
    /// Whether the item must be dropped from the result set.
    pub fn forces_removal(&self) -> bool {
        self.remove || self.relevance_score < RELEVANCE_FLOOR
    }
}

// ---------------------------------------------------------------------------
// Search filters
// ---------------------------------------------------------------------------

/// Normalized filter map produced by intent parsing and passed to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,
    #[serde(default, alias = "min_sale_price", skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(default, alias = "max_sale_price", skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default, alias = "delivery_days", skip_serializing_if = "Option::is_none")]
    pub delivery_days_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_class: Option<String>,
    /// Any further filters the parser produced, forwarded to the catalog as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SearchFilters {
    /// Whether the caller constrained price or delivery time.
    pub fn has_price_or_delivery_constraint(&self) -> bool {
        self.min_price.is_some() || self.max_price.is_some() || self.delivery_days_max.is_some()
    }

    /// Drop blank strings and nulls so they never reach the catalog.
    pub fn pruned(mut self) -> Self {
        fn blank(value: &Option<String>) -> bool {
            value.as_deref().is_none_or(|v| v.trim().is_empty())
        }
        if blank(&self.keywords) {
            self.keywords = None;
        }
        if blank(&self.language) {
            self.language = None;
        }
        if blank(&self.query_class) {
            self.query_class = None;
        }
        self.extra.retain(|_, v| match v {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.trim().is_empty(),
            _ => true,
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// A saved price-watch subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    /// Push recipient token of the owner's device.
    pub owner_token: String,
    pub item_id: String,
    pub title: String,
    /// Last price the owner was told about; only ever lowered by the scanner.
    pub reference_price: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Minimal projection of an active subscription used by the alert scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub id: String,
    pub owner_token: String,
    pub item_id: String,
    pub title: String,
    pub reference_price: f64,
}

impl From<&Subscription> for SubscriptionRecord {
    fn from(sub: &Subscription) -> Self {
        Self {
            id: sub.id.clone(),
            owner_token: sub.owner_token.clone(),
            item_id: sub.item_id.clone(),
            title: sub.title.clone(),
            reference_price: sub.reference_price,
        }
    }
}

/// Observed base-currency price for one item, valid for one scan batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
}
