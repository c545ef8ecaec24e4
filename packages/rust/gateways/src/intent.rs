//! Completion-backed query intent parsing.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use shopally_shared::{CompletionClient, IntentParser, Result, SearchFilters, ShopAllyError};
use tracing::{debug, instrument, warn};

use crate::extract_json;
use crate::fx::FxConverter;

/// Queries containing any of these are refused before reaching the model.
const BLOCKED_TERMS: &[&str] = &[
    "drugs",
    "weapons",
    "firearms",
    "explosives",
    "contraband",
    "porn",
    "sex toys",
    "adult content",
    "erotic",
    "hentai",
    "illegal",
    "smuggled",
    "stolen goods",
    "counterfeit",
    "hate speech",
    "violence",
    "racist",
    "discriminatory",
];

/// Keys read into typed [`SearchFilters`] fields; everything else goes to `extra`.
const CONSUMED_KEYS: &[&str] = &[
    "keywords",
    "min_price",
    "min_sale_price",
    "max_price",
    "max_sale_price",
    "delivery_days_max",
    "delivery_days",
    "language",
    "query_class",
    "is_etb",
    "original_budget",
];

/// [`IntentParser`] that asks a completion model for a JSON filter object.
///
/// Budgets are read as ETB unless the model flags them otherwise and are
/// converted to USD when an [`FxConverter`] with a known rate is attached.
pub struct LlmIntentParser {
    client: Arc<dyn CompletionClient>,
    fx: Option<FxConverter>,
}

impl LlmIntentParser {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client, fx: None }
    }

    pub fn with_fx(mut self, fx: FxConverter) -> Self {
        self.fx = Some(fx);
        self
    }

    async fn to_filters(&self, query: &str, mut map: Map<String, Value>) -> SearchFilters {
        let keywords = map
            .get("keywords")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .unwrap_or(query)
            .to_string();

        let mut min_price = number(&map, &["min_price", "min_sale_price"]);
        let mut max_price = number(&map, &["max_price", "max_sale_price"]);
        let delivery_days_max = number(&map, &["delivery_days_max", "delivery_days"])
            .filter(|d| *d >= 0.0)
            .map(|d| d.round() as u32);

        let is_etb = map.get("is_etb").and_then(Value::as_bool).unwrap_or(true);
        if is_etb {
            if let Some(fx) = &self.fx {
                if let Some(min) = min_price.filter(|p| *p > 0.0) {
                    min_price = Some(fx.etb_to_usd(min).await.unwrap_or(min));
                }
                if let Some(max) = max_price.filter(|p| *p > 0.0) {
                    max_price = Some(fx.etb_to_usd(max).await.unwrap_or(max));
                }
            }
        }

        let language = map
            .get("language")
            .and_then(Value::as_str)
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty())
            .or_else(|| has_ethiopic_script(query).then(|| "am".to_string()));

        let query_class = map
            .get("query_class")
            .and_then(Value::as_str)
            .map(str::to_string);

        map.retain(|key, _| !CONSUMED_KEYS.contains(&key.as_str()));

        SearchFilters {
            keywords: Some(keywords),
            min_price,
            max_price,
            delivery_days_max,
            language,
            query_class,
            extra: map.into_iter().collect(),
        }
    }
}

#[async_trait]
impl IntentParser for LlmIntentParser {
    #[instrument(skip_all, fields(query_len = query.len()))]
    async fn parse_intent(&self, query: &str) -> Result<SearchFilters> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ShopAllyError::validation("query is empty"));
        }
        if is_prohibited(query) {
            warn!("query refused by content filter");
            return Err(ShopAllyError::validation(
                "query contains prohibited content",
            ));
        }

        let completion = self.client.complete(&intent_prompt(query)).await?;
        let parsed = extract_json(&completion)
            .map(|json| serde_json::from_str::<Map<String, Value>>(json));
        let map = match parsed {
            Some(Ok(map)) => map,
            Some(Err(e)) => {
                warn!(error = %e, "intent completion is not a JSON object, using raw query");
                Map::new()
            }
            None => {
                warn!("intent completion has no JSON object, using raw query");
                Map::new()
            }
        };

        let filters = self.to_filters(query, map).await;
        debug!(?filters, "intent parsed");
        Ok(filters)
    }
}

/// Whether the query mentions any blocked term (case-insensitive substring).
pub fn is_prohibited(query: &str) -> bool {
    let lower = query.to_lowercase();
    BLOCKED_TERMS.iter().any(|term| lower.contains(term))
}

/// Whether the text contains characters from the Ethiopic block (Amharic).
pub fn has_ethiopic_script(text: &str) -> bool {
    text.chars().any(|c| ('\u{1200}'..='\u{137F}').contains(&c))
}

/// First key in `keys` holding a number or a numeric string.
fn number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn intent_prompt(query: &str) -> String {
    format!(
        r#"Extract shopping search filters from the user query. Output only one JSON object:
{{"keywords": string (English), "min_sale_price": number|null, "max_sale_price": number|null,
"delivery_days": number|null, "language": "en"|"am"|null, "is_etb": boolean,
"category_ids": string|null}}
Convert number words to digits. Keep budget values as stated, without currency conversion.
Set is_etb to false only when the budget is in dollars.

QUERY: "{query}""#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::FX_USD_ETB_KEY;
    use shopally_shared::KeyValueCache;
    use shopally_storage::MemoryCache;

    struct Canned(String);

    #[async_trait]
    impl CompletionClient for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn parser(reply: &str) -> LlmIntentParser {
        LlmIntentParser::new(Arc::new(Canned(reply.to_string())))
    }

    #[tokio::test]
    async fn maps_sale_price_aliases() {
        let reply = r#"```json
{"keywords": "phone", "min_sale_price": 10, "max_sale_price": "200", "delivery_days": 7.0,
 "is_etb": false, "category_ids": null, "ship_to_country": "ET"}
```"#;
        let filters = parser(reply).parse_intent("cheap phone").await.unwrap();
        assert_eq!(filters.keywords.as_deref(), Some("phone"));
        assert_eq!(filters.min_price, Some(10.0));
        assert_eq!(filters.max_price, Some(200.0));
        assert_eq!(filters.delivery_days_max, Some(7));
        assert_eq!(filters.extra.get("ship_to_country"), Some(&Value::from("ET")));
        assert!(!filters.extra.contains_key("is_etb"));
    }

    #[tokio::test]
    async fn unparsable_reply_falls_back_to_query() {
        let filters = parser("I cannot help").parse_intent(" red shoes ").await.unwrap();
        assert_eq!(filters.keywords.as_deref(), Some("red shoes"));
        assert!(filters.min_price.is_none());
    }

    #[tokio::test]
    async fn prohibited_queries_are_refused() {
        let err = parser("{}")
            .parse_intent("cheap FIREARMS")
            .await
            .unwrap_err();
        assert!(matches!(err, ShopAllyError::Validation { .. }));
    }

    #[tokio::test]
    async fn ethiopic_query_detects_amharic() {
        let filters = parser(r#"{"keywords": "phone"}"#)
            .parse_intent("ስልክ")
            .await
            .unwrap();
        assert_eq!(filters.language.as_deref(), Some("am"));
    }

    #[tokio::test]
    async fn etb_budgets_convert_to_usd() {
        let cache = Arc::new(MemoryCache::new());
        cache.set(FX_USD_ETB_KEY, "100", None).await.unwrap();
        let parser = parser(r#"{"keywords": "laptop", "max_sale_price": 50000}"#)
            .with_fx(FxConverter::new(cache));

        let filters = parser.parse_intent("laptop under 50000 birr").await.unwrap();
        assert_eq!(filters.max_price, Some(500.0));
    }

    #[test]
    fn blocklist_is_case_insensitive() {
        assert!(is_prohibited("Stolen Goods cheap"));
        assert!(!is_prohibited("garden hose"));
    }
}
