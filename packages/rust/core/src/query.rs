//! Query normalization and cache keys.

/// Canonical form of a query for cache partitioning: lower-cased tokens,
/// sorted, joined by single spaces.
pub fn normalize_query_class(query: &str) -> String {
    let lower = query.to_lowercase();
    let mut tokens: Vec<&str> = lower.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Cache key for an enriched item. Distinct languages or query classes never
/// share an entry.
pub fn cache_key(item_id: &str, language: &str, query_class: &str) -> String {
    format!("product_summary:{item_id}:{language}:{query_class}")
}
