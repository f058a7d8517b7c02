use crate::config::{BackoffKind, RetryPolicy};
use crate::constants::retry::MAX_RETRY_AFTER_SECONDS;
use crate::errors::EngineError;
use crate::services::logger::Logger;
use crate::services::transport::TransportResponse;
use std::future::Future;
use std::time::{Duration, Instant};

/// Final result of a retried call plus how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<TransportResponse, EngineError>,
    pub attempts: u32,
    /// Backoff actually slept before each retry.
    pub delays: Vec<Duration>,
}

pub struct RetryController<'a> {
    policy: &'a RetryPolicy,
    logger: &'a Logger,
}

impl<'a> RetryController<'a> {
    pub fn new(policy: &'a RetryPolicy, logger: &'a Logger) -> Self {
        Self { policy, logger }
    }

    /// Delay before the retry that follows attempt number `attempt` (1-based).
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponential = || {
            let exp = attempt.saturating_sub(1).min(31);
            policy
                .base_delay
                .checked_mul(1u32 << exp)
                .unwrap_or(policy.max_delay)
                .min(policy.max_delay)
        };
        match policy.backoff {
            BackoffKind::Fixed => policy.base_delay.min(policy.max_delay),
            BackoffKind::Exponential => exponential(),
            BackoffKind::ExponentialJitter => {
                exponential().mul_f64(rand::random::<f64>()).min(policy.max_delay)
            }
        }
    }

    /// Runs `attempt_fn` until it yields a non-retriable outcome, attempts
    /// run out, or `deadline` passes. Each attempt is aborted when the
    /// deadline is reached.
    pub async fn run<F, Fut>(&self, deadline: Option<Instant>, mut attempt_fn: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<TransportResponse, EngineError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let budget_ms = self.budget_ms(deadline);
        let mut delays = Vec::new();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match deadline {
                None => attempt_fn(attempt).await,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        Err(EngineError::Timeout(budget_ms))
                    } else {
                        tokio::time::timeout(remaining, attempt_fn(attempt))
                            .await
                            .unwrap_or(Err(EngineError::Timeout(budget_ms)))
                    }
                }
            };

            let hint = match self.retry_decision(&result) {
                Some(hint) if attempt < max_attempts => hint,
                _ => {
                    return RetryOutcome {
                        result,
                        attempts: attempt,
                        delays,
                    }
                }
            };

            let computed = Self::backoff_delay(self.policy, attempt);
            let delay = hint.map_or(computed, |hinted| {
                hinted
                    .min(Duration::from_secs(MAX_RETRY_AFTER_SECONDS))
                    .max(computed)
            });
            if let Some(deadline) = deadline {
                let resume_at = Instant::now().checked_add(delay);
                if resume_at.map_or(true, |at| at >= deadline) {
                    self.logger.warn(
                        "Retry abandoned: backoff exceeds the remaining time budget",
                        Some(&serde_json::json!({
                            "attempt": attempt,
                            "delay_ms": millis(delay),
                        })),
                    );
                    return RetryOutcome {
                        result,
                        attempts: attempt,
                        delays,
                    };
                }
            }

            self.logger.warn(
                "Retrying request",
                Some(&serde_json::json!({
                    "attempt": attempt,
                    "max_attempts": max_attempts,
                    "delay_ms": millis(delay),
                    "reason": describe(&result),
                })),
            );
            tokio::time::sleep(delay).await;
            delays.push(delay);
        }
    }

    /// `None` when the outcome is terminal; `Some(hint)` when it may be
    /// retried, carrying the server's Retry-After for 429 responses.
    fn retry_decision(&self, result: &Result<TransportResponse, EngineError>) -> Option<Option<Duration>> {
        match result {
            Ok(response) if self.policy.is_retriable_status(response.status) => {
                let hint = (response.status == 429 && self.policy.respect_retry_after)
                    .then(|| response.header("retry-after").and_then(parse_retry_after))
                    .flatten();
                Some(hint)
            }
            Ok(_) => None,
            Err(EngineError::Transport(err)) if self.policy.is_retriable_error(err.kind) => Some(None),
            Err(_) => None,
        }
    }

    fn budget_ms(&self, deadline: Option<Instant>) -> u64 {
        deadline
            .map(|d| millis(d.saturating_duration_since(Instant::now())))
            .or_else(|| self.policy.timeout.map(millis))
            .unwrap_or(0)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn describe(result: &Result<TransportResponse, EngineError>) -> String {
    match result {
        Ok(response) => format!("status {}", response.status),
        Err(err) => err.to_string(),
    }
}

/// Accepts delta-seconds (integer or fractional) or an HTTP date.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<f64>() {
        return (seconds.is_finite() && seconds >= 0.0)
            .then(|| Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX));
    }
    let at = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}
