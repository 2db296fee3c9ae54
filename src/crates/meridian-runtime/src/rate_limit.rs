//! Per-client token-bucket rate limiter
//!
//! One bucket per client id (IP or authenticated principal), refilled
//! linearly at `requests_per_minute / 60` tokens per second. Exempt paths
//! (health probes) never touch a bucket. A janitor pass drops buckets idle
//! for more than an hour.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use meridian_core::time::TimeService;

const IDLE_EVICTION_SECS: f64 = 3600.0;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub enum RateDecision {
    Allowed,
    /// Refused; retry after this many seconds.
    Limited { retry_after_secs: f64 },
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: f64,
    last_seen: f64,
}

/// In-memory token-bucket limiter.
pub struct RateLimiter {
    requests_per_minute: f64,
    buckets: DashMap<String, Bucket>,
    exempt_paths: HashSet<String>,
    time: Arc<dyn TimeService>,
}

impl RateLimiter {
    pub fn new(
        requests_per_minute: u32,
        exempt_paths: impl IntoIterator<Item = String>,
        time: Arc<dyn TimeService>,
    ) -> Self {
        Self {
            requests_per_minute: f64::from(requests_per_minute.max(1)),
            buckets: DashMap::new(),
            exempt_paths: exempt_paths.into_iter().collect(),
            time,
        }
    }

    /// Check one request. Exempt paths are always allowed and consume no
    /// tokens.
    pub fn check(&self, client_id: &str, path: &str) -> RateDecision {
        if self.exempt_paths.contains(path) {
            return RateDecision::Allowed;
        }

        let now = self.time.timestamp();
        let rate_per_sec = self.requests_per_minute / 60.0;
        let mut bucket = self
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| Bucket {
                tokens: self.requests_per_minute,
                last_refill: now,
                last_seen: now,
            });

        let elapsed = (now - bucket.last_refill).max(0.0);
        bucket.tokens =
            (bucket.tokens + elapsed * rate_per_sec).min(self.requests_per_minute);
        bucket.last_refill = now;
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allowed
        } else {
            let retry_after_secs = (1.0 - bucket.tokens) / rate_per_sec;
            RateDecision::Limited { retry_after_secs }
        }
    }

    /// Drop buckets idle for more than an hour. Returns evicted count.
    pub fn evict_idle(&self) -> usize {
        let now = self.time.timestamp();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now - bucket.last_seen <= IDLE_EVICTION_SECS);
        before - self.buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::time::ManualTimeService;

    fn limiter(rate: u32, time: Arc<ManualTimeService>) -> RateLimiter {
        RateLimiter::new(rate, vec!["/system/health".to_string()], time)
    }

    #[test]
    fn test_fresh_bucket_allows_rate_then_refuses() {
        let time = Arc::new(ManualTimeService::new());
        let limiter = limiter(10, time);

        for _ in 0..10 {
            assert_eq!(limiter.check("client-1", "/agent/status"), RateDecision::Allowed);
        }
        match limiter.check("client-1", "/agent/status") {
            RateDecision::Limited { retry_after_secs } => assert!(retry_after_secs > 0.0),
            RateDecision::Allowed => panic!("eleventh request should be limited"),
        }
    }

    #[test]
    fn test_linear_refill() {
        let time = Arc::new(ManualTimeService::new());
        let limiter = limiter(60, time.clone());

        for _ in 0..60 {
            assert_eq!(limiter.check("c", "/agent/status"), RateDecision::Allowed);
        }
        assert!(matches!(
            limiter.check("c", "/agent/status"),
            RateDecision::Limited { .. }
        ));

        // 60/min refills one token per second.
        time.advance_secs(2);
        assert_eq!(limiter.check("c", "/agent/status"), RateDecision::Allowed);
        assert_eq!(limiter.check("c", "/agent/status"), RateDecision::Allowed);
        assert!(matches!(
            limiter.check("c", "/agent/status"),
            RateDecision::Limited { .. }
        ));
    }

    #[test]
    fn test_exempt_path_never_consumes() {
        let time = Arc::new(ManualTimeService::new());
        let limiter = limiter(5, time);

        for _ in 0..10_000 {
            assert_eq!(
                limiter.check("client-1", "/system/health"),
                RateDecision::Allowed
            );
        }
        assert_eq!(limiter.bucket_count(), 0);

        // The same client on a metered path still has a full bucket.
        for _ in 0..5 {
            assert_eq!(limiter.check("client-1", "/agent/status"), RateDecision::Allowed);
        }
        assert!(matches!(
            limiter.check("client-1", "/agent/status"),
            RateDecision::Limited { .. }
        ));
    }

    #[test]
    fn test_clients_are_isolated() {
        let time = Arc::new(ManualTimeService::new());
        let limiter = limiter(1, time);

        assert_eq!(limiter.check("a", "/x"), RateDecision::Allowed);
        assert!(matches!(limiter.check("a", "/x"), RateDecision::Limited { .. }));
        assert_eq!(limiter.check("b", "/x"), RateDecision::Allowed);
    }

    #[test]
    fn test_idle_eviction() {
        let time = Arc::new(ManualTimeService::new());
        let limiter = limiter(10, time.clone());

        limiter.check("old", "/x");
        time.advance_secs(1800);
        limiter.check("fresh", "/x");
        time.advance_secs(2000);

        // "old" idle 3800s, "fresh" idle 2000s.
        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.bucket_count(), 1);
    }
}
