//! Outbound request wrapper with pacing and bounded retry
//!
//! Every platform request goes through one shared [`Fetcher`]. Pacing applies
//! to every attempt, first attempts included, so the aggregate request rate
//! across all workers stays bounded. Transient failures are retried up to the
//! attempt limit; definitive failures return immediately.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Jitter, Quota, RateLimiter};
use thiserror::Error;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Outbound request failure
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Upstream server error (HTTP {0})")]
    Server(u16),

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Login expired or required")]
    AuthExpired,

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl FetchError {
    /// Transient failures may succeed when re-attempted
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_)
                | FetchError::Connection(_)
                | FetchError::Server(_)
                | FetchError::RateLimited
                | FetchError::Exhausted { .. }
        )
    }

    /// Classify a transport-level reqwest failure
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::from_status(status.as_u16(), err.to_string())
        } else {
            FetchError::Connection(err.to_string())
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => FetchError::AuthExpired,
            403 => FetchError::PermissionDenied(body),
            404 => FetchError::NotFound(body),
            408 => FetchError::Timeout(body),
            // 412 is the platform's anti-abuse response
            412 | 429 => FetchError::RateLimited,
            s if s >= 500 => FetchError::Server(s),
            s => FetchError::Api {
                code: i64::from(s),
                message: body,
            },
        }
    }
}

/// Attempt limit and pacing
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    /// Total attempts per request (at least 1)
    pub max_attempts: u32,
    /// Minimum spacing between any two outbound requests
    pub pacing: Duration,
    /// Upper bound of random delay added when a request has to wait
    pub jitter: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pacing: Duration::from_millis(2000),
            jitter: Duration::from_millis(500),
        }
    }
}

impl From<&vdig_common::config::EngineConfig> for FetchPolicy {
    fn from(config: &vdig_common::config::EngineConfig) -> Self {
        Self {
            max_attempts: config.fetch_attempts,
            pacing: Duration::from_millis(config.pacing_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

/// Shared, cloneable request gate
#[derive(Clone)]
pub struct Fetcher {
    /// `None` when pacing is disabled
    limiter: Option<Arc<DirectLimiter>>,
    jitter: Duration,
    max_attempts: u32,
}

impl Fetcher {
    pub fn new(policy: FetchPolicy) -> Self {
        let limiter = Quota::with_period(policy.pacing)
            .map(|quota| Arc::new(RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN))));
        Self {
            limiter,
            jitter: policy.jitter,
            max_attempts: policy.max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait for the next pacing slot
    pub async fn pace(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready_with_jitter(Jitter::up_to(self.jitter)).await;
        }
    }

    /// Run `operation` with pacing, retrying transient failures
    ///
    /// Returns the first definitive failure unchanged, or
    /// [`FetchError::Exhausted`] carrying the last transient cause.
    pub async fn fetch<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.pace().await;

            if attempt > 1 {
                tracing::debug!(operation = operation_name, attempt, "Retrying request");
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = operation_name,
                            attempt,
                            "Request succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Request failed definitively"
                    );
                    return Err(err);
                }
                Err(err) => {
                    if attempt >= self.max_attempts {
                        tracing::warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %err,
                            "Request failed: retries exhausted"
                        );
                        return Err(FetchError::Exhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }

                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient request failure, will retry"
                    );
                }
            }
        }
    }
}
