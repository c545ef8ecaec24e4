//! Deterministic ordering and filtering of listings.

use shopally_shared::{Item, RELEVANCE_FLOOR, SearchFilters};

/// Scores and orders items. All sorts are stable.
#[derive(Debug, Clone, Copy)]
pub struct RankingEngine {
    /// Items must score strictly above this to survive [`RankingEngine::retain_relevant`].
    threshold: u8,
}

impl Default for RankingEngine {
    fn default() -> Self {
        Self::new(RELEVANCE_FLOOR)
    }
}

impl RankingEngine {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    /// Blend of rating (rescaled to 0–100) and seller trust.
    pub fn default_score(item: &Item) -> f64 {
        0.6 * (item.rating / 5.0 * 100.0) + 0.4 * item.seller_score
    }

    /// Sort by [`RankingEngine::default_score`], highest first, unless the
    /// shopper constrained price or delivery; then upstream order stands.
    pub fn apply_default_order(&self, items: &mut [Item], filters: &SearchFilters) {
        if filters.has_price_or_delivery_constraint() {
            return;
        }
        items.sort_by(|a, b| Self::default_score(b).total_cmp(&Self::default_score(a)));
    }

    /// Drop items flagged for removal or not above the threshold.
    pub fn retain_relevant(&self, items: &mut Vec<Item>) {
        let threshold = self.threshold;
        items.retain(|item| !item.remove && item.relevance > threshold);
    }

    /// Sort by relevance, highest first; ties keep their current order.
    pub fn relevance_order(&self, items: &mut [Item]) {
        items.sort_by(|a, b| b.relevance.cmp(&a.relevance));
    }

    pub fn finalize(&self, mut items: Vec<Item>) -> Vec<Item> {
        self.retain_relevant(&mut items);
        self.relevance_order(&mut items);
        items
    }
}
