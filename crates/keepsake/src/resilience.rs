//! Retry and circuit-breaking for remote collaborators
//!
//! Remote embedding and completion endpoints share one request path: POST a
//! JSON body, retry 429s, 5xx responses and transport errors with exponential
//! backoff, and stop calling altogether while the breaker is open.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// Delay to wait after the given zero-based failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Opens after `threshold` consecutive failures and lets a single trial call
/// through once `cooldown` has elapsed.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether a call may proceed right now
    pub fn allow(&self) -> bool {
        let mut state = self.lock();
        match state.opened_at {
            None => true,
            Some(opened) if opened.elapsed() >= self.cooldown => {
                // half-open: the next failure re-opens immediately
                state.opened_at = None;
                state.consecutive_failures = self.threshold.saturating_sub(1);
                true
            }
            Some(_) => false,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.threshold && state.opened_at.is_none() {
            warn!(
                "Circuit opened after {} consecutive failures",
                state.consecutive_failures
            );
            state.opened_at = Some(Instant::now());
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock()
            .opened_at
            .is_some_and(|opened| opened.elapsed() < self.cooldown)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// POST `body` as JSON, retrying transient failures.
///
/// Returns the first successful response. Non-retryable statuses fail
/// immediately with the response text.
pub async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    api_key: &str,
    body: &B,
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
) -> Result<Response, String> {
    if !breaker.allow() {
        return Err("circuit open".to_string());
    }

    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if !api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let retry_reason = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    breaker.record_success();
                    return Ok(response);
                }

                if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    breaker.record_failure();
                    return Err(format!("API returned {status}: {error_text}"));
                }
                format!("API returned {status}")
            }
            Err(e) => e.to_string(),
        };

        last_error = Some(retry_reason.clone());
        if attempt + 1 < policy.max_attempts {
            let delay = policy.delay_for(attempt);
            warn!(
                "Request to {} failed on attempt {}/{}, retrying in {:?}: {}",
                url,
                attempt + 1,
                policy.max_attempts,
                delay,
                retry_reason
            );
            tokio::time::sleep(delay).await;
        }
    }

    breaker.record_failure();
    debug!("Giving up on {} after {} attempts", url, policy.max_attempts);
    Err(format!(
        "Failed after {} attempts: {}",
        policy.max_attempts,
        last_error.unwrap_or_else(|| "Unknown error".to_string())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_policy_has_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow());
    }

    #[test]
    fn test_breaker_success_resets() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_breaker_half_opens_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert!(breaker.allow(), "cooldown elapsed, trial call allowed");
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_success();
        assert!(!breaker.is_open());
    }
}
