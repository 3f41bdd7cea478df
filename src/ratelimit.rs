//! Throttling for the one upstream catalog API that enforces rate limits.
//!
//! Two independent mechanisms:
//! - [`RateLimiter`]: a call counter that inserts a fixed cooldown every
//!   `threshold` calls.
//! - [`BackoffPolicy`]: bounded exponential retry of a single request that
//!   was answered with `429 Too Many Requests`.

use reqwest::{RequestBuilder, Response, StatusCode};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::traits::GenerationError;

#[derive(Debug, Default)]
struct RateLimiterState {
    call_count: u64,
    cooldown_until: Option<Instant>,
}

/// Counter-based limiter shared by every caller of the throttled backend.
///
/// The mutex only covers the counter update and threshold check; sleeping
/// and the network call itself happen outside of it.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<RateLimiterState>,
    threshold: u64,
    cooldown: Duration,
}

impl RateLimiter {
    /// `threshold` of zero is treated as one.
    pub fn new(threshold: u64, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(RateLimiterState::default()),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// Registers one call, sleeping first if a cooldown is in effect.
    ///
    /// The call right after every `threshold`-th call opens a cooldown window;
    /// it and every caller arriving inside the window wait for it to close.
    pub async fn acquire(&self) {
        let wait = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.call_count += 1;
            let now = Instant::now();
            if state.call_count > 1 && (state.call_count - 1) % self.threshold == 0 {
                state.cooldown_until = Some(now + self.cooldown);
                info!(
                    calls = state.call_count - 1,
                    cooldown_secs = self.cooldown.as_secs_f64(),
                    "Rate limit threshold reached, cooling down"
                );
            }
            state
                .cooldown_until
                .and_then(|until| until.checked_duration_since(now))
        };

        if let Some(wait) = wait.filter(|w| !w.is_zero()) {
            tokio::time::sleep(wait).await;
        }
    }

    /// Total calls registered so far.
    pub fn call_count(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .call_count
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// Retry policy for requests answered with `429`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,

    /// Attempt `i` (zero-based) is followed by a `2^i * base` sleep
    pub base: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Sends the request built by `build`, retrying on `429`.
    ///
    /// Any other status, success or not, is returned to the caller as-is.
    pub async fn send<F>(&self, build: F) -> Result<Response, GenerationError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.send_inner(None, build).await
    }

    /// Like [`BackoffPolicy::send`], registering every attempt with `limiter`
    /// so retries count toward its threshold.
    pub async fn send_limited<F>(
        &self,
        limiter: &RateLimiter,
        build: F,
    ) -> Result<Response, GenerationError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.send_inner(Some(limiter), build).await
    }

    async fn send_inner<F>(
        &self,
        limiter: Option<&RateLimiter>,
        build: F,
    ) -> Result<Response, GenerationError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut url = String::new();
        for attempt in 0..self.max_retries {
            if let Some(limiter) = limiter {
                limiter.acquire().await;
            }
            let response = build().send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            url = response.url().to_string();
            if attempt + 1 < self.max_retries {
                let delay = self.delay(attempt);
                warn!(
                    %url,
                    attempt = attempt + 1,
                    max_retries = self.max_retries,
                    backoff_ms = delay.as_millis() as u64,
                    "Rate limited, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(GenerationError::RateLimited {
            url,
            attempts: self.max_retries,
        })
    }
}
