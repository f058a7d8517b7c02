use crate::config::RateLimitPolicy;
use crate::errors::EngineError;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const EPSILON: f64 = 1e-9;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

/// Token bucket for one connector. Refill and consume happen under one lock
/// so concurrent callers can never overdraw the bucket; waiting happens
/// outside the lock.
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    active: bool,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(policy: &RateLimitPolicy) -> Self {
        let capacity = policy.burst_size.max(1) as f64;
        Self {
            rate: policy.requests_per_second,
            capacity,
            active: policy.is_active(),
            bucket: Mutex::new(TokenBucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// A cost of zero counts as one; a cost above the bucket capacity is
    /// clamped so the request can still be admitted.
    pub fn normalize_cost(&self, cost: u32) -> f64 {
        (cost.max(1) as f64).min(self.capacity)
    }

    /// Admits immediately or returns how long the caller should wait before
    /// checking again.
    pub fn try_acquire(&self, cost: u32) -> Result<(), Duration> {
        if !self.active {
            return Ok(());
        }
        let cost = self.normalize_cost(cost);
        let mut bucket = self.bucket.lock().unwrap_or_else(|err| err.into_inner());
        bucket.refill(Instant::now(), self.rate, self.capacity);
        if bucket.tokens + EPSILON >= cost {
            bucket.tokens = (bucket.tokens - cost).max(0.0);
            return Ok(());
        }
        let deficit = cost - bucket.tokens;
        Err(Duration::try_from_secs_f64(deficit / self.rate).unwrap_or(Duration::MAX))
    }

    /// Suspends the caller until `cost` tokens are available. Fails with
    /// `RateLimitTimeout` instead of waiting past `deadline`. Returns the time
    /// spent waiting.
    pub async fn acquire(&self, cost: u32, deadline: Option<Instant>) -> Result<Duration, EngineError> {
        let mut waited = Duration::ZERO;
        loop {
            let wait = match self.try_acquire(cost) {
                Ok(()) => return Ok(waited),
                Err(wait) => wait,
            };
            if let Some(deadline) = deadline {
                let ready_at = Instant::now().checked_add(wait);
                if ready_at.map_or(true, |at| at > deadline) {
                    return Err(EngineError::RateLimitTimeout {
                        wait_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            }
            tokio::time::sleep(wait).await;
            waited = waited.saturating_add(wait);
        }
    }

    pub fn available(&self) -> f64 {
        if !self.active {
            return f64::INFINITY;
        }
        let mut bucket = self.bucket.lock().unwrap_or_else(|err| err.into_inner());
        bucket.refill(Instant::now(), self.rate, self.capacity);
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(rps: f64, burst: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            requests_per_second: rps,
            burst_size: burst,
            ..RateLimitPolicy::default()
        }
    }

    #[test]
    fn burst_is_admitted_then_blocked() {
        let limiter = RateLimiter::new(&policy(1.0, 3));
        for _ in 0..3 {
            assert!(limiter.try_acquire(1).is_ok());
        }
        let wait = limiter.try_acquire(1).expect_err("bucket drained");
        assert!(wait > Duration::from_millis(900) && wait <= Duration::from_secs(1));
    }

    #[test]
    fn costs_are_normalized() {
        let limiter = RateLimiter::new(&policy(1.0, 4));
        assert_eq!(limiter.normalize_cost(0), 1.0);
        assert_eq!(limiter.normalize_cost(9), 4.0);
        assert!(limiter.try_acquire(9).is_ok());
        assert!(limiter.try_acquire(1).is_err());
    }

    #[test]
    fn disabled_policy_never_waits() {
        let limiter = RateLimiter::new(&policy(0.0, 1));
        for _ in 0..100 {
            assert!(limiter.try_acquire(1).is_ok());
        }
    }

    #[tokio::test]
    async fn wait_past_deadline_fails_fast() {
        let limiter = RateLimiter::new(&policy(0.5, 1));
        limiter.acquire(1, None).await.expect("first");
        let deadline = Instant::now() + Duration::from_millis(50);
        let err = limiter
            .acquire(1, Some(deadline))
            .await
            .expect_err("two second wait exceeds budget");
        assert!(matches!(err, EngineError::RateLimitTimeout { .. }));
    }

    #[tokio::test]
    async fn vanishing_rate_saturates_the_wait() {
        let limiter = RateLimiter::new(&policy(1e-20, 1));
        limiter.acquire(1, None).await.expect("first");
        assert_eq!(limiter.try_acquire(1), Err(Duration::MAX));
        let deadline = Instant::now() + Duration::from_millis(50);
        let err = limiter
            .acquire(1, Some(deadline))
            .await
            .expect_err("wait cannot fit the budget");
        assert!(matches!(err, EngineError::RateLimitTimeout { wait_ms } if wait_ms == u64::MAX));
    }

    #[tokio::test]
    async fn refill_admits_after_wait() {
        let limiter = RateLimiter::new(&policy(50.0, 1));
        limiter.acquire(1, None).await.expect("first");
        let started = Instant::now();
        let waited = limiter.acquire(1, None).await.expect("second");
        assert!(waited >= Duration::from_millis(15));
        assert!(started.elapsed() >= Duration::from_millis(15));
    }
}
