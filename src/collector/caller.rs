//! Resilient upstream call wrapper
//!
//! Every broker call made during a cycle goes through [`ResilientCaller::call`],
//! which recovers from auth expiry (token refresh) and rate limiting (backoff)
//! and turns everything else into an empty result. It never propagates an
//! error: a missed cycle is acceptable, a crashed logger is not.
//!
//! The retry loop is an explicit state machine:
//!
//! ```text
//! Idle -> Calling -> Done
//!           |-- Auth --------> RefreshingToken -> Calling | Exhausted
//!           |-- RateLimited -> BackoffWaiting  -> Calling | Exhausted
//!           `-- Other -------> Failed
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::kite::{AccessToken, TokenRefresher, UpstreamError};

/// Retry bounds for one logical call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Recoveries (refreshes or backoff sleeps) allowed before giving up
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let mut policy = Self::default();

        if let Ok(v) = std::env::var("CALLER_MAX_RETRIES") {
            policy.max_retries = v.parse().unwrap_or(policy.max_retries);
        }
        if let Ok(v) = std::env::var("CALLER_BACKOFF_BASE_MS") {
            if let Ok(ms) = v.parse() {
                policy.base_delay = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("CALLER_BACKOFF_CAP_MS") {
            if let Ok(ms) = v.parse() {
                policy.max_delay = Duration::from_millis(ms);
            }
        }

        policy
    }

    /// Delay before the next rate-limited retry.
    ///
    /// A positive server hint wins (capped); otherwise exponential backoff from
    /// `base_delay`, doubling per attempt, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        if let Some(hint) = server_hint.filter(|h| !h.is_zero()) {
            return hint.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Calling,
    RefreshingToken,
    BackoffWaiting(Duration),
    /// Retry budget spent; terminal, yields an empty result
    Exhausted,
}

pub struct ResilientCaller {
    refresher: Arc<dyn TokenRefresher>,
    token: Arc<AccessToken>,
    policy: RetryPolicy,
}

impl ResilientCaller {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        token: Arc<AccessToken>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            refresher,
            token,
            policy,
        }
    }

    /// Run `op` until it succeeds, fails terminally, or the retry budget is
    /// spent. Returns `None` for every outcome except success.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempts = 0u32;
        let mut state = CallState::Idle;

        loop {
            state = match state {
                CallState::Idle => CallState::Calling,
                CallState::Calling => match op().await {
                    Ok(payload) => {
                        if attempts > 0 {
                            debug!(operation, attempts, "Upstream call recovered");
                        }
                        return Some(payload);
                    }
                    Err(UpstreamError::Auth(reason)) => {
                        warn!(operation, attempt = attempts + 1, %reason, "Auth failure, refreshing token");
                        CallState::RefreshingToken
                    }
                    Err(UpstreamError::RateLimited { retry_after }) => {
                        let delay = self.policy.backoff_delay(attempts, retry_after);
                        warn!(
                            operation,
                            attempt = attempts + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Rate limited, backing off"
                        );
                        CallState::BackoffWaiting(delay)
                    }
                    Err(UpstreamError::Other(reason)) => {
                        warn!(operation, %reason, "Upstream call failed");
                        return None;
                    }
                },
                CallState::RefreshingToken => {
                    match self.refresher.refresh().await {
                        Ok(fresh) => self.token.set(fresh),
                        Err(e) => error!(operation, error = %e, "Token refresh failed"),
                    }
                    attempts += 1;
                    self.after_recovery(attempts)
                }
                CallState::BackoffWaiting(delay) => {
                    sleep(delay).await;
                    attempts += 1;
                    self.after_recovery(attempts)
                }
                CallState::Exhausted => {
                    error!(
                        operation,
                        retries = self.policy.max_retries,
                        "Upstream call failed after retries"
                    );
                    return None;
                }
            };
        }
    }

    fn after_recovery(&self, attempts: u32) -> CallState {
        if attempts >= self.policy.max_retries {
            CallState::Exhausted
        } else {
            CallState::Calling
        }
    }
}
