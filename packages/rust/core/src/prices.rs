//! Batched current-price lookup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use shopally_shared::{PriceFetcher, PriceQuote, Result};
use tracing::{debug, instrument};

use crate::scope::Scope;

/// Looks up current prices for many items with as few upstream calls as the
/// chunk size allows.
pub struct PriceService {
    fetcher: Arc<dyn PriceFetcher>,
    chunk_size: usize,
}

impl PriceService {
    pub fn new(fetcher: Arc<dyn PriceFetcher>, chunk_size: usize) -> Self {
        Self {
            fetcher,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Quotes for the distinct ids in `item_ids`. Ids the upstream does not
    /// know, or quotes at a non-positive price, are absent from the map. Any
    /// failed chunk fails the whole lookup.
    #[instrument(skip_all, fields(requested = item_ids.len()))]
    pub async fn current_prices(
        &self,
        item_ids: &[String],
        scope: &Scope,
    ) -> Result<HashMap<String, PriceQuote>> {
        let ids = dedupe_ids(item_ids);
        let mut quotes = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(self.chunk_size) {
            let prices = scope.run(self.fetcher.fetch_prices(chunk)).await??;
            for (id, price) in prices {
                if price > 0.0 {
                    quotes.insert(id, PriceQuote { price });
                }
            }
        }

        debug!(distinct = ids.len(), found = quotes.len(), "prices resolved");
        Ok(quotes)
    }
}

/// Trim ids and drop blanks and repeats, keeping first-seen order.
pub fn dedupe_ids(item_ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(item_ids.len());
    item_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect()
}
