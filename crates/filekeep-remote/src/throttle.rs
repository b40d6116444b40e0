//! Request rate limiting for the authenticated GitHub API.
//!
//! Token bucket via `governor`; the raw-content endpoint is not limited.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// GitHub's documented budget for authenticated requests.
pub const DEFAULT_REQUESTS_PER_HOUR: u32 = 5000;

#[derive(Clone)]
pub struct ApiLimiter {
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    requests_per_hour: u32,
}

impl std::fmt::Debug for ApiLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiLimiter")
            .field("requests_per_hour", &self.requests_per_hour)
            .finish()
    }
}

impl ApiLimiter {
    /// Allow `requests_per_hour` requests; 0 disables limiting.
    pub fn per_hour(requests_per_hour: u32) -> Self {
        let limiter = NonZeroU32::new(requests_per_hour)
            .map(|rate| Arc::new(RateLimiter::direct(Quota::per_hour(rate))));
        Self {
            limiter,
            requests_per_hour,
        }
    }

    pub fn unlimited() -> Self {
        Self::per_hour(0)
    }

    pub fn is_limited(&self) -> bool {
        self.limiter.is_some()
    }

    pub fn requests_per_hour(&self) -> u32 {
        self.requests_per_hour
    }

    /// Wait until one request may be sent.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Take one request slot if available without waiting.
    pub fn try_acquire(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }
}

impl Default for ApiLimiter {
    fn default() -> Self {
        Self::per_hour(DEFAULT_REQUESTS_PER_HOUR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_capped() {
        let limiter = ApiLimiter::per_hour(2);
        assert!(limiter.is_limited());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_unlimited_never_blocks() {
        let limiter = ApiLimiter::unlimited();
        assert!(!limiter.is_limited());
        assert!((0..10_000).all(|_| limiter.try_acquire()));
    }

    #[test]
    fn test_default_budget() {
        assert_eq!(ApiLimiter::default().requests_per_hour(), 5000);
    }

    #[tokio::test]
    async fn test_acquire_within_budget_returns() {
        let limiter = ApiLimiter::per_hour(3);
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(limiter.try_acquire());
    }
}
