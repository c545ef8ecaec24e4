//! HTTP catalog adapter.
//!
//! Speaks the affiliate product API shape: listings nested under
//! `<method>_response.resp_result.result.products.product`, with prices and
//! percentages encoded as strings.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use shopally_shared::{
    CatalogConfig, CatalogGateway, Item, Price, PriceFetcher, Result, SearchFilters,
    ShopAllyError,
};
use tracing::{debug, info, instrument};
use url::Url;

use crate::fx::FxConverter;
use crate::http::{build_client, check_status, transport_error};

const SERVICE: &str = "catalog";

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct Envelope {
    #[serde(
        default,
        rename = "aliexpress_affiliate_product_query_response",
        alias = "aliexpress_affiliate_productdetail_get_response"
    )]
    response: ResponseBody,
}

#[derive(Deserialize, Default)]
struct ResponseBody {
    #[serde(default)]
    resp_result: RespResult,
}

#[derive(Deserialize, Default)]
struct RespResult {
    #[serde(default)]
    result: ResultBody,
}

#[derive(Deserialize, Default)]
struct ResultBody {
    #[serde(default)]
    products: Products,
}

#[derive(Deserialize, Default)]
struct Products {
    #[serde(default)]
    product: Vec<RawProduct>,
}

#[derive(Deserialize, Default)]
struct RawProduct {
    #[serde(default, deserialize_with = "lenient_string")]
    product_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    product_title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    product_main_image_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    product_detail_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    target_sale_price: String,
    #[serde(default, deserialize_with = "lenient_string")]
    target_app_sale_price: String,
    #[serde(default, deserialize_with = "lenient_string")]
    sale_price: String,
    #[serde(default, deserialize_with = "lenient_string")]
    app_sale_price: String,
    #[serde(default, deserialize_with = "lenient_string")]
    discount: String,
    #[serde(default, deserialize_with = "lenient_string")]
    evaluate_rate: String,
    #[serde(default, deserialize_with = "lenient_string")]
    tax_rate: String,
    #[serde(default, deserialize_with = "lenient_string")]
    ship_to_days: String,
    #[serde(default, deserialize_with = "lenient_string")]
    lastest_volume: String,
}

impl RawProduct {
    /// Base-currency price: target sale, then target app sale, then the raw
    /// sale prices.
    fn usd_price(&self) -> f64 {
        [
            &self.target_sale_price,
            &self.target_app_sale_price,
            &self.sale_price,
            &self.app_sale_price,
        ]
        .into_iter()
        .map(|raw| parse_decimal(raw))
        .find(|p| *p > 0.0)
        .unwrap_or(0.0)
    }

    fn into_item(self, fx_rate: Option<f64>) -> Item {
        let usd = self.usd_price();
        let rating = (parse_percent(&self.evaluate_rate) / 20.0 * 10.0).round() / 10.0;
        Item {
            id: self.product_id.trim().to_string(),
            title: self.product_title.trim().to_string(),
            image_url: self.product_main_image_url.trim().to_string(),
            price: Price {
                usd,
                etb: fx_rate.map_or(0.0, |rate| usd * rate),
                fx_timestamp: Utc::now(),
            },
            rating,
            seller_score: 0.0,
            delivery_estimate: self.ship_to_days.trim().to_string(),
            description: String::new(),
            highlights: Vec::new(),
            deeplink_url: self.product_detail_url.trim().to_string(),
            tax_rate: parse_decimal(&self.tax_rate),
            discount: parse_percent(&self.discount),
            number_sold: parse_decimal(&self.lastest_volume).max(0.0) as u64,
            relevance: 0,
            remove: false,
        }
    }
}

/// Accept strings, numbers and nulls for fields the upstream encodes loosely.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// Parse `"1,234.50"` style decimals; anything unparsable is 0.
fn parse_decimal(raw: &str) -> f64 {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return 0.0;
    }
    cleaned.parse().unwrap_or(0.0)
}

/// Parse `"92.1%"` style percentages; anything unparsable is 0.
fn parse_percent(raw: &str) -> f64 {
    parse_decimal(raw.trim().trim_end_matches('%'))
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// [`CatalogGateway`] and [`PriceFetcher`] over the catalog HTTP API.
pub struct HttpCatalogGateway {
    client: Client,
    search_url: Url,
    detail_url: Url,
    fx: FxConverter,
}

impl HttpCatalogGateway {
    pub fn new(config: &CatalogConfig, fx: FxConverter) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|e| ShopAllyError::config(format!("catalog base_url '{base}': {e}")))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|e| ShopAllyError::config(format!("catalog url {path}: {e}")))
        };

        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            search_url: join("products/search")?,
            detail_url: join("products/detail")?,
            fx,
        })
    }

    async fn get_products(&self, url: &Url, params: &[(String, String)]) -> Result<Vec<RawProduct>> {
        let response = self
            .client
            .get(url.clone())
            .query(params)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        let response = check_status(SERVICE, response).await?;
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| ShopAllyError::parse(format!("catalog response: {e}")))?;
        Ok(envelope.response.resp_result.result.products.product)
    }
}

#[async_trait]
impl CatalogGateway for HttpCatalogGateway {
    #[instrument(skip_all, fields(keywords = %keywords))]
    async fn fetch_products(&self, keywords: &str, filters: &SearchFilters) -> Result<Vec<Item>> {
        let params = search_params(keywords, filters);
        let raw = self.get_products(&self.search_url, &params).await?;

        let fx_rate = self.fx.rate("USD", "ETB").await.ok();
        if fx_rate.is_none() {
            debug!("no USD->ETB rate, local prices will be 0");
        }

        let items: Vec<Item> = raw
            .into_iter()
            .filter(|p| !p.product_id.trim().is_empty())
            .map(|p| p.into_item(fx_rate))
            .collect();
        info!(count = items.len(), "catalog returned products");
        Ok(items)
    }
}

#[async_trait]
impl PriceFetcher for HttpCatalogGateway {
    #[instrument(skip_all, fields(ids = item_ids.len()))]
    async fn fetch_prices(&self, item_ids: &[String]) -> Result<HashMap<String, f64>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let params = vec![("product_ids".to_string(), item_ids.join(","))];
        let raw = self.get_products(&self.detail_url, &params).await?;

        let prices: HashMap<String, f64> = raw
            .iter()
            .filter_map(|p| {
                let id = p.product_id.trim();
                let usd = p.usd_price();
                (!id.is_empty() && usd > 0.0).then(|| (id.to_string(), usd))
            })
            .collect();
        debug!(found = prices.len(), "prices fetched");
        Ok(prices)
    }
}

/// Query parameters for a catalog search. Typed filters use the upstream
/// names; extra scalar filters pass through unchanged.
fn search_params(keywords: &str, filters: &SearchFilters) -> Vec<(String, String)> {
    let mut params = vec![("keywords".to_string(), keywords.to_string())];
    if let Some(min) = filters.min_price {
        params.push(("min_sale_price".into(), min.to_string()));
    }
    if let Some(max) = filters.max_price {
        params.push(("max_sale_price".into(), max.to_string()));
    }
    if let Some(days) = filters.delivery_days_max {
        params.push(("delivery_days".into(), days.to_string()));
    }
    for (key, value) in &filters.extra {
        let value = match value {
            Value::String(s) if !s.trim().is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        params.push((key.clone(), value));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::FX_USD_ETB_KEY;
    use shopally_shared::KeyValueCache;
    use shopally_storage::MemoryCache;
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn listing(products: Value) -> Value {
        serde_json::json!({
            "aliexpress_affiliate_product_query_response": {
                "resp_result": {"result": {"products": {"product": products}}}
            }
        })
    }

    async fn gateway(server: &MockServer, rate: Option<&str>) -> HttpCatalogGateway {
        let cache = Arc::new(MemoryCache::new());
        if let Some(rate) = rate {
            cache.set(FX_USD_ETB_KEY, rate, None).await.unwrap();
        }
        let config = CatalogConfig {
            base_url: server.uri(),
            ..CatalogConfig::default()
        };
        HttpCatalogGateway::new(&config, FxConverter::new(cache)).unwrap()
    }

    #[test]
    fn price_fallback_chain() {
        let mut p = RawProduct {
            sale_price: "12.5".into(),
            app_sale_price: "11".into(),
            ..RawProduct::default()
        };
        assert_eq!(p.usd_price(), 12.5);
        p.target_app_sale_price = "9.99".into();
        assert_eq!(p.usd_price(), 9.99);
        p.target_sale_price = "1,015.00".into();
        assert_eq!(p.usd_price(), 1015.0);
    }

    #[test]
    fn percentages_and_rating_scale() {
        assert_eq!(parse_percent("50%"), 50.0);
        assert_eq!(parse_percent(""), 0.0);
        assert_eq!(parse_percent("n/a"), 0.0);

        let item = RawProduct {
            product_id: "1".into(),
            evaluate_rate: "92.1%".into(),
            ..RawProduct::default()
        }
        .into_item(None);
        assert_eq!(item.rating, 4.6);
        assert_eq!(item.price.etb, 0.0);
    }

    #[test]
    fn extra_filters_pass_through() {
        let mut filters = SearchFilters {
            max_price: Some(20.0),
            ..SearchFilters::default()
        };
        filters.extra.insert("ship_to_country".into(), Value::from("ET"));
        filters.extra.insert("category_ids".into(), Value::Null);

        let params = search_params("phone", &filters);
        assert!(params.contains(&("max_sale_price".into(), "20".into())));
        assert!(params.contains(&("ship_to_country".into(), "ET".into())));
        assert!(!params.iter().any(|(k, _)| k == "category_ids"));
    }

    #[tokio::test]
    async fn search_maps_products() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/search"))
            .and(query_param("keywords", "phone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(serde_json::json!([
                {
                    "product_id": 1005001,
                    "product_title": " Phone ",
                    "target_sale_price": "15.90",
                    "discount": "50%",
                    "evaluate_rate": "100%",
                    "tax_rate": "0.1",
                    "ship_to_days": "7",
                    "lastest_volume": 42,
                    "product_detail_url": "https://shop.example/item/1005001"
                },
                {"product_title": "no id"}
            ]))))
            .mount(&server)
            .await;

        let gw = gateway(&server, Some("100")).await;
        let items = gw
            .fetch_products("phone", &SearchFilters::default())
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.id, "1005001");
        assert_eq!(item.title, "Phone");
        assert_eq!(item.price.usd, 15.9);
        assert_eq!(item.price.etb, 1590.0);
        assert_eq!(item.rating, 5.0);
        assert_eq!(item.discount, 50.0);
        assert_eq!(item.number_sold, 42);
    }

    #[tokio::test]
    async fn upstream_errors_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let gw = gateway(&server, None).await;
        let err = gw
            .fetch_products("phone", &SearchFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ShopAllyError::Upstream { status: 503, .. }));
    }

    #[tokio::test]
    async fn price_lookup_skips_missing_and_non_positive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/detail"))
            .and(query_param("product_ids", "a,b,c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "aliexpress_affiliate_productdetail_get_response": {
                    "resp_result": {"result": {"products": {"product": [
                        {"product_id": "a", "target_sale_price": "18.00"},
                        {"product_id": "b", "target_sale_price": "0"}
                    ]}}}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gw = gateway(&server, None).await;
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let prices = gw.fetch_prices(&ids).await.unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["a"], 18.0);
    }
}
