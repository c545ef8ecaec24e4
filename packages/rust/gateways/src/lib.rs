//! Adapters from the ShopAlly ports to the outside world.
//!
//! This crate provides:
//! - [`HttpCatalogGateway`]: catalog search and batch price lookup over HTTP
//! - [`GeminiClient`]: text completion with API-key rotation via [`KeyPool`]
//! - [`LlmIntentParser`] and [`LlmContentEnricher`]: completion-backed parsing
//! - [`HttpPushSender`]: push notification delivery
//! - [`FxConverter`]: USD to ETB conversion from the cached rate

pub mod catalog;
pub mod enricher;
pub mod fx;
mod http;
pub mod intent;
pub mod keys;
pub mod llm;
pub mod push;

pub use catalog::HttpCatalogGateway;
pub use enricher::LlmContentEnricher;
pub use fx::{FX_USD_ETB_KEY, FxConverter};
pub use intent::LlmIntentParser;
pub use keys::{KeyPool, KeyStats};
pub use llm::GeminiClient;
pub use push::HttpPushSender;

/// Extract the outermost JSON object from a model completion.
///
/// Handles code fences and chatty prefixes or suffixes. Returns `None` when no
/// `{...}` span exists.
pub fn extract_json(text: &str) -> Option<&str> {
    let mut s = text.trim();

    if let Some(fence) = s.find("```") {
        let after = &s[fence + 3..];
        // Skip the info string (`json`) up to the end of the fence line.
        let body_start = after.find('\n').map_or(after.len(), |i| i + 1);
        let body = &after[body_start..];
        s = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
    }

    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| s[start..=end].trim())
}
