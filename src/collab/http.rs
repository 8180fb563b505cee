//! Transport retries for the generation endpoint.
//!
//! These cover a single HTTP exchange. Whole generation calls are retried
//! again by the engine's `RetryExecutor`.

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Upper bound for a server-provided `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub(super) struct TransportPolicy {
    pub retries: usize,
    pub base_delay: Duration,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl TransportPolicy {
    fn should_retry_status(&self, status: StatusCode, attempt: usize) -> bool {
        attempt < self.retries
            && (status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::REQUEST_TIMEOUT
                || status.is_server_error())
    }

    fn should_retry_error(&self, err: &reqwest::Error, attempt: usize) -> bool {
        attempt < self.retries && (err.is_timeout() || err.is_connect())
    }

    /// base x 2^attempt, plus up to a quarter of that as jitter.
    fn delay(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        let jitter_ms = (delay.as_millis() / 4).min(u128::from(u64::MAX)) as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    /// Send the request built by `build`, retrying transient failures.
    /// A non-success response that is not retried is returned as is.
    pub async fn send(&self, mut build: impl FnMut() -> RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    if !self.should_retry_status(status, attempt) {
                        return Ok(response);
                    }
                    let delay = retry_after(&response).unwrap_or_else(|| self.delay(attempt));
                    debug!(
                        "Generation endpoint answered {}; retry {}/{} in {:?}",
                        status,
                        attempt + 1,
                        self.retries,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    if !self.should_retry_error(&err, attempt) {
                        return Err(anyhow::Error::new(err)).with_context(|| {
                            format!("Generation request failed after {} attempt(s)", attempt + 1)
                        });
                    }
                    let delay = self.delay(attempt);
                    debug!(
                        "Generation request error: {}; retry {}/{} in {:?}",
                        err,
                        attempt + 1,
                        self.retries,
                        delay
                    );
                    sleep(delay).await;
                }
            }
            attempt += 1;
        }
    }
}

/// `Retry-After` given in seconds, capped.
fn retry_after(response: &Response) -> Option<Duration> {
    let secs: u64 = response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_within_jitter() {
        let policy = TransportPolicy::default();
        for attempt in 0..3 {
            let base = Duration::from_secs(1 << attempt);
            let d = policy.delay(attempt);
            assert!(d >= base && d <= base + base / 4, "{:?}", d);
        }
    }

    #[test]
    fn test_zero_base_has_no_delay() {
        let policy = TransportPolicy {
            retries: 2,
            base_delay: Duration::ZERO,
        };
        assert_eq!(policy.delay(1), Duration::ZERO);
    }

    #[test]
    fn test_status_retry_rules() {
        let policy = TransportPolicy::default();
        assert!(policy.should_retry_status(StatusCode::TOO_MANY_REQUESTS, 0));
        assert!(policy.should_retry_status(StatusCode::BAD_GATEWAY, 1));
        assert!(!policy.should_retry_status(StatusCode::BAD_GATEWAY, 2));
        assert!(!policy.should_retry_status(StatusCode::UNAUTHORIZED, 0));
        assert!(!policy.should_retry_status(StatusCode::BAD_REQUEST, 0));
    }
}
