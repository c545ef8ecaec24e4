//! Periodic price-drop scanner.
//!
//! Each tick pages through active subscriptions, looks up current prices once
//! per page for the distinct items in it, notifies owners whose item dropped
//! below their reference price, and ratchets that reference price down.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use shopally_shared::{
    AlertScanConfig, NotificationSender, PriceFetcher, PriceQuote, Result, SubscriptionRecord,
    SubscriptionStore,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::prices::PriceService;
use crate::scope::Scope;

/// Quotes must be below the reference price by more than this to count as a drop.
pub const PRICE_EPSILON: f64 = 1e-6;

pub const NOTIFICATION_TITLE: &str = "Price drop on a saved product";

/// Where the scanner is within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    #[default]
    Idle,
    /// Reading a page of active subscriptions.
    Scanning,
    /// Looking up prices for the page.
    Batching,
    /// Comparing, notifying and persisting.
    Notifying,
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub pages: usize,
    pub subscriptions: usize,
    pub quotes: usize,
    pub drops: usize,
    pub notified: usize,
    pub notify_failures: usize,
    pub updated: usize,
    pub update_failures: usize,
}

/// Resets the phase to idle however the tick ends.
struct PhaseGuard<'a>(&'a Mutex<ScanPhase>);

impl PhaseGuard<'_> {
    fn set(&self, phase: ScanPhase) {
        *self.0.lock() = phase;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = ScanPhase::Idle;
    }
}

pub struct AlertScanner {
    store: Arc<dyn SubscriptionStore>,
    prices: PriceService,
    sender: Arc<dyn NotificationSender>,
    config: AlertScanConfig,
    phase: Mutex<ScanPhase>,
}

impl AlertScanner {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        fetcher: Arc<dyn PriceFetcher>,
        sender: Arc<dyn NotificationSender>,
        config: AlertScanConfig,
    ) -> Self {
        Self {
            store,
            prices: PriceService::new(fetcher, config.fetch_chunk_size),
            sender,
            config,
            phase: Mutex::new(ScanPhase::Idle),
        }
    }

    pub fn phase(&self) -> ScanPhase {
        *self.phase.lock()
    }

    /// Scan immediately, then once per interval, until `scope` is cancelled.
    /// A failed tick is logged and the loop carries on.
    pub async fn run(&self, scope: &Scope) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.interval.as_secs(), "alert scanner started");

        loop {
            if scope.run(ticker.tick()).await.is_err() {
                break;
            }
            match self.tick(scope).await {
                Ok(report) => info!(
                    subscriptions = report.subscriptions,
                    drops = report.drops,
                    notified = report.notified,
                    updated = report.updated,
                    "alert scan finished"
                ),
                Err(_) if scope.is_cancelled() => break,
                Err(e) => error!(error = %e, "alert scan failed"),
            }
        }

        info!("alert scanner stopped");
    }

    /// One full pass over the active subscriptions.
    #[instrument(skip_all)]
    pub async fn tick(&self, scope: &Scope) -> Result<TickReport> {
        let guard = PhaseGuard(&self.phase);
        let mut report = TickReport::default();
        let mut after: Option<String> = None;

        loop {
            guard.set(ScanPhase::Scanning);
            let page = scope
                .run(self.store.active_page(after.as_deref(), self.config.page_size))
                .await??;
            if page.is_empty() {
                break;
            }
            report.pages += 1;
            report.subscriptions += page.len();
            after = page.last().map(|sub| sub.id.clone());

            self.process_page(&page, scope, &guard, &mut report).await?;

            if page.len() < self.config.page_size {
                break;
            }
        }

        Ok(report)
    }

    async fn process_page(
        &self,
        page: &[SubscriptionRecord],
        scope: &Scope,
        guard: &PhaseGuard<'_>,
        report: &mut TickReport,
    ) -> Result<()> {
        guard.set(ScanPhase::Batching);
        let ids: Vec<String> = page.iter().map(|sub| sub.item_id.clone()).collect();
        let quotes: HashMap<String, PriceQuote> = self.prices.current_prices(&ids, scope).await?;
        report.quotes += quotes.len();

        guard.set(ScanPhase::Notifying);
        for sub in page {
            let Some(quote) = quotes.get(sub.item_id.trim()) else {
                continue;
            };
            if !is_drop(sub.reference_price, quote.price) {
                continue;
            }
            report.drops += 1;

            if !sub.owner_token.trim().is_empty() {
                self.notify(sub, quote.price, scope, report).await?;
            }

            match scope
                .run(self.store.lower_reference_price(&sub.id, quote.price))
                .await?
            {
                Ok(true) => report.updated += 1,
                Ok(false) => {
                    debug!(subscription = %sub.id, "reference price already lower or inactive");
                }
                Err(e) => {
                    report.update_failures += 1;
                    warn!(subscription = %sub.id, error = %e, "failed to store new reference price");
                }
            }
        }
        Ok(())
    }

    async fn notify(
        &self,
        sub: &SubscriptionRecord,
        new_price: f64,
        scope: &Scope,
        report: &mut TickReport,
    ) -> Result<()> {
        let (title, body, data) = drop_message(sub, new_price);
        match scope
            .run(self.sender.send(&sub.owner_token, title, &body, &data))
            .await?
        {
            Ok(message_id) => {
                report.notified += 1;
                debug!(subscription = %sub.id, %message_id, "price drop notified");
            }
            Err(e) => {
                report.notify_failures += 1;
                warn!(subscription = %sub.id, error = %e, "price drop notification failed");
            }
        }
        Ok(())
    }
}

/// Whether `quote` is a real drop below `reference`.
pub fn is_drop(reference: f64, quote: f64) -> bool {
    quote < reference - PRICE_EPSILON
}

/// Title, body and metadata of a price-drop push.
pub fn drop_message(
    sub: &SubscriptionRecord,
    new_price: f64,
) -> (&'static str, String, HashMap<String, String>) {
    let name = if sub.title.trim().is_empty() {
        sub.item_id.as_str()
    } else {
        sub.title.trim()
    };
    let body = format!("There is a price drop on '{name}'. Refresh to check the new price.");
    let data = HashMap::from([
        ("productId".to_string(), sub.item_id.clone()),
        ("oldPrice".to_string(), format!("{:.2}", sub.reference_price)),
        ("newPrice".to_string(), format!("{new_price:.2}")),
    ]);
    (NOTIFICATION_TITLE, body, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, price: f64) -> SubscriptionRecord {
        SubscriptionRecord {
            id: "s1".into(),
            owner_token: "tok".into(),
            item_id: "item-9".into(),
            title: title.into(),
            reference_price: price,
        }
    }

    #[test]
    fn drop_requires_strict_decrease() {
        assert!(is_drop(20.0, 18.0));
        assert!(!is_drop(20.0, 20.0));
        assert!(!is_drop(20.0, 20.0 - 1e-9));
        assert!(!is_drop(18.0, 19.0));
    }

    #[test]
    fn message_uses_title_or_item_id() {
        let (title, body, data) = drop_message(&record("Desk lamp", 20.0), 18.5);
        assert_eq!(title, NOTIFICATION_TITLE);
        assert!(body.contains("'Desk lamp'"));
        assert_eq!(data["productId"], "item-9");
        assert_eq!(data["oldPrice"], "20.00");
        assert_eq!(data["newPrice"], "18.50");

        let (_, body, _) = drop_message(&record(" ", 20.0), 18.0);
        assert!(body.contains("'item-9'"));
    }
}
