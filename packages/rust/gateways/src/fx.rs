//! Currency conversion backed by the shared cache.
//!
//! The USD to ETB rate lives under [`FX_USD_ETB_KEY`] as a decimal string. A
//! missing or unparsable value means the rate is unavailable.

use std::sync::Arc;

use shopally_shared::{KeyValueCache, Result, ShopAllyError};

/// Cache key holding the USD to ETB rate.
pub const FX_USD_ETB_KEY: &str = "fx:USD:ETB";

/// Converts amounts using rates read from a [`KeyValueCache`].
#[derive(Clone)]
pub struct FxConverter {
    cache: Arc<dyn KeyValueCache>,
}

impl FxConverter {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    /// Current rate for converting one unit of `from` into `to`.
    pub async fn rate(&self, from: &str, to: &str) -> Result<f64> {
        let key = fx_key(from, to);
        let raw = self
            .cache
            .get(&key)
            .await?
            .ok_or_else(|| ShopAllyError::validation(format!("{from}->{to} rate not found")))?;
        let rate: f64 = raw
            .trim()
            .parse()
            .map_err(|e| ShopAllyError::parse(format!("bad rate at {key} '{raw}': {e}")))?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ShopAllyError::validation(format!(
                "rate at {key} must be positive, got {rate}"
            )));
        }
        Ok(rate)
    }

    /// Convert a USD amount to ETB. Returns `(etb, rate)`.
    pub async fn usd_to_etb(&self, usd: f64) -> Result<(f64, f64)> {
        let rate = self.rate("USD", "ETB").await?;
        Ok((usd * rate, rate))
    }

    /// Convert a USD amount to ETB, or 0 when no rate is available.
    pub async fn usd_to_etb_or_zero(&self, usd: f64) -> f64 {
        match self.usd_to_etb(usd).await {
            Ok((etb, _)) => etb,
            Err(e) => {
                tracing::debug!(usd, error = %e, "fx conversion unavailable");
                0.0
            }
        }
    }

    /// Convert an ETB amount to USD, when a rate is available.
    pub async fn etb_to_usd(&self, etb: f64) -> Option<f64> {
        self.rate("USD", "ETB").await.ok().map(|rate| etb / rate)
    }

    /// Store a rate. Rates never expire on their own.
    pub async fn set_rate(&self, from: &str, to: &str, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ShopAllyError::validation("rate must be a positive number"));
        }
        self.cache
            .set(&fx_key(from, to), &rate.to_string(), None)
            .await
    }
}

fn fx_key(from: &str, to: &str) -> String {
    format!(
        "fx:{}:{}",
        from.trim().to_ascii_uppercase(),
        to.trim().to_ascii_uppercase()
    )
}
