//! Text completion over the Gemini `generateContent` API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shopally_shared::{CompletionClient, LlmConfig, Result, ShopAllyError};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::http::{build_client, check_status, transport_error};
use crate::keys::KeyPool;

const SERVICE: &str = "llm";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Default)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Default)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// [`CompletionClient`] for Gemini models, rotating API keys by least use.
pub struct GeminiClient {
    client: Client,
    url: Url,
    model: String,
    keys: Arc<KeyPool>,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig, keys: Arc<KeyPool>) -> Result<Self> {
        let mut endpoint = config.endpoint.clone();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let url = Url::parse(&endpoint)
            .and_then(|base| base.join(&format!("models/{}:generateContent", config.model)))
            .map_err(|e| ShopAllyError::config(format!("llm endpoint '{endpoint}': {e}")))?;

        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            url,
            model: config.model.clone(),
            keys,
        })
    }

    pub fn keys(&self) -> &Arc<KeyPool> {
        &self.keys
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let key = self
            .keys
            .checkout()
            .ok_or_else(|| ShopAllyError::config("no LLM API keys configured"))?;

        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };
        let response = self
            .client
            .post(self.url.clone())
            .query(&[("key", key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        let response = check_status(SERVICE, response).await?;
        let decoded: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ShopAllyError::parse(format!("llm response: {e}")))?;

        // First candidate with any text wins; its parts are joined so a fenced
        // block split across parts stays whole.
        for candidate in decoded.candidates {
            let text = candidate
                .content
                .parts
                .iter()
                .map(|p| p.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                debug!(chars = text.len(), "completion received");
                return Ok(text);
            }
        }

        warn!("empty completion");
        Err(ShopAllyError::Enrichment("llm returned an empty response".into()))
    }
}
