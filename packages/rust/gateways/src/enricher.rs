//! Completion-backed content enrichment.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use shopally_shared::{CompletionClient, ContentEnricher, Enrichment, Item, Result, ShopAllyError};
use tracing::instrument;

use crate::extract_json;

/// Shape the model is asked to return. Scores arrive as arbitrary numbers.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnrichment {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "summaryBullets")]
    highlights: Vec<String>,
    #[serde(alias = "relevance", alias = "aiMatchPercentage")]
    relevance_score: f64,
    #[serde(default)]
    remove: bool,
}

impl From<RawEnrichment> for Enrichment {
    fn from(raw: RawEnrichment) -> Self {
        let score = if raw.relevance_score.is_finite() {
            raw.relevance_score.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        Enrichment {
            title: raw.title.trim().to_string(),
            description: raw.description.trim().to_string(),
            highlights: raw
                .highlights
                .into_iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
            relevance_score: score,
            remove: raw.remove,
        }
    }
}

/// [`ContentEnricher`] that rewrites listing text and scores relevance with a
/// completion model.
pub struct LlmContentEnricher {
    client: Arc<dyn CompletionClient>,
}

impl LlmContentEnricher {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentEnricher for LlmContentEnricher {
    #[instrument(skip_all, fields(item_id = %item.id, language))]
    async fn enrich(&self, item: &Item, query: &str, language: &str) -> Result<Enrichment> {
        let item_json = serde_json::to_string_pretty(item)
            .map_err(|e| ShopAllyError::Enrichment(format!("encode item {}: {e}", item.id)))?;
        let completion = self
            .client
            .complete(&enrichment_prompt(&item_json, query, language))
            .await?;

        let json = extract_json(&completion).ok_or_else(|| {
            ShopAllyError::Enrichment(format!("no JSON object in completion for {}", item.id))
        })?;
        let raw: RawEnrichment = serde_json::from_str(json)
            .map_err(|e| ShopAllyError::Enrichment(format!("bad enrichment for {}: {e}", item.id)))?;
        Ok(raw.into())
    }
}

fn enrichment_prompt(item_json: &str, query: &str, language: &str) -> String {
    format!(
        r#"You rewrite product listings for a shopper. Output only one JSON object:
{{"title": string, "description": string, "highlights": [string],
"relevanceScore": integer 0-100, "remove": boolean}}
Write all text in language "{language}". Keep facts from the listing; do not invent
prices or specifications. relevanceScore rates how well the product matches the
shopper's request. Set remove to true when the product clearly does not match.

SHOPPER REQUEST: "{query}"

LISTING:
{item_json}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<String>);

    #[async_trait]
    impl CompletionClient for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(ShopAllyError::RateLimited("slow down".into())),
            }
        }
    }

    fn enricher(reply: Result<String>) -> LlmContentEnricher {
        LlmContentEnricher::new(Arc::new(Canned(reply)))
    }

    #[tokio::test]
    async fn parses_fenced_enrichment() {
        let reply = "```json\n{\"title\": \" Phone X \", \"description\": \"Fast\", \
                     \"highlights\": [\"5G\", \" \"], \"relevanceScore\": 87}\n```";
        let result = enricher(Ok(reply.into()))
            .enrich(&Item::new("1", "phone"), "phone", "en")
            .await
            .unwrap();
        assert_eq!(result.title, "Phone X");
        assert_eq!(result.highlights, vec!["5G".to_string()]);
        assert_eq!(result.relevance_score, 87);
        assert!(!result.remove);
    }

    #[tokio::test]
    async fn scores_are_clamped() {
        let high = enricher(Ok(r#"{"relevanceScore": 140}"#.into()))
            .enrich(&Item::new("1", "x"), "x", "en")
            .await
            .unwrap();
        assert_eq!(high.relevance_score, 100);

        let low = enricher(Ok(r#"{"relevanceScore": -3.5}"#.into()))
            .enrich(&Item::new("1", "x"), "x", "en")
            .await
            .unwrap();
        assert_eq!(low.relevance_score, 0);
        assert!(low.forces_removal());
    }

    #[tokio::test]
    async fn missing_score_is_an_error() {
        let err = enricher(Ok(r#"{"title": "x"}"#.into()))
            .enrich(&Item::new("1", "x"), "x", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, ShopAllyError::Enrichment(_)));
    }

    #[tokio::test]
    async fn rate_limits_propagate() {
        let err = enricher(Err(ShopAllyError::RateLimited(String::new())))
            .enrich(&Item::new("1", "x"), "x", "en")
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
    }
}
