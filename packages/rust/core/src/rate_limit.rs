//! Token-bucket rate limiter shared by enrichment tasks.
//!
//! Callers reserve a token up front and sleep off any deficit, so waiters are
//! served in reservation order. A reservation abandoned through cancellation
//! hands its token back.

use std::time::Duration;

use parking_lot::Mutex;
use shopally_shared::Result;
use tokio::time::Instant;
use tracing::trace;

use crate::scope::Scope;

#[derive(Debug)]
struct Bucket {
    /// May go negative: outstanding reservations not yet covered by refill.
    tokens: f64,
    last: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    per_second: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A limiter allowing `per_second` acquisitions on average with bursts of
    /// up to `burst`. The bucket starts full.
    pub fn new(per_second: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            per_second: per_second.max(f64::EPSILON),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Wait for a permit. Returns `Cancelled` if `scope` ends first.
    pub async fn acquire(&self, scope: &Scope) -> Result<()> {
        let wait = self.reserve();
        if wait.is_zero() {
            return Ok(());
        }
        trace!(wait_ms = wait.as_millis() as u64, "waiting for rate limit permit");
        if let Err(e) = scope.sleep(wait).await {
            self.refund();
            return Err(e);
        }
        Ok(())
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.burst);
        bucket.last = now;
    }

    /// Take one token and return how long the caller must wait for it.
    fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.per_second)
        }
    }

    fn refund(&self) {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens = (bucket.tokens + 1.0).min(self.burst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_immediate() {
        let limiter = RateLimiter::new(1.0, 3);
        let scope = Scope::new();
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(&scope).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_rate_is_enforced() {
        let limiter = RateLimiter::new(2.0, 1);
        let scope = Scope::new();
        let start = Instant::now();
        for _ in 0..6 {
            limiter.acquire(&scope).await.unwrap();
        }
        // First permit is free; five more at 2/s.
        assert!(start.elapsed() >= Duration::from_millis(2500));
        assert!(start.elapsed() < Duration::from_millis(2600));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_returns_token() {
        let limiter = RateLimiter::new(1.0, 1);
        let scope = Scope::new();
        limiter.acquire(&scope).await.unwrap();

        let short = Scope::with_timeout(Duration::from_millis(100));
        assert!(limiter.acquire(&short).await.is_err());

        // The refunded reservation means the next caller waits one interval, not two.
        let start = Instant::now();
        limiter.acquire(&scope).await.unwrap();
        assert!(start.elapsed() <= Duration::from_secs(1));
    }
}
