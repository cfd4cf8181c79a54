//! HTTP retry policy with exponential backoff.
//!
//! # Policy
//!
//! - Max retries: 2 (3 total attempts)
//! - Initial delay: 500ms, doubling per retry
//! - Max delay: 8 seconds
//! - Jitter: down-jitter up to 25% (multiplier in [0.75, 1.0])
//!
//! # Retryable Conditions
//!
//! - HTTP 408, 409, 429, 5xx
//! - Connection and timeout errors
//! - `x-should-retry: true` forces a retry, `x-should-retry: false` forbids one
//! - `retry-after-ms` / `retry-after` replace the computed delay when in (0, 60s)

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode, header::HeaderMap};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 0.25 = up to 25% shorter than the computed delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no backoff.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `backoff_step + 1`.
    #[must_use]
    pub fn delay_for(&self, backoff_step: u32, headers: Option<&HeaderMap>) -> Duration {
        if let Some(delay) = headers.and_then(parse_retry_after) {
            return delay;
        }

        let exp = i32::try_from(backoff_step).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * 2.0_f64.powi(exp);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jitter = 1.0 - rand::random::<f64>() * self.jitter_factor;
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Reads `retry-after-ms` (float milliseconds) then `retry-after` (integer seconds).
///
/// Values outside `(0, 60s)` are ignored.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let in_range = |d: Duration| d > Duration::ZERO && d < Duration::from_secs(60);

    let from_ms = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .filter(|d| in_range(*d));
    if from_ms.is_some() {
        return from_ms;
    }

    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .filter(|d| in_range(*d))
}

/// Whether a response with this status should be retried.
#[must_use]
pub fn should_retry(status: StatusCode, headers: &HeaderMap) -> bool {
    match headers.get("x-should-retry").and_then(|v| v.to_str().ok()) {
        Some(v) if v.eq_ignore_ascii_case("true") => return true,
        Some(v) if v.eq_ignore_ascii_case("false") => return false,
        _ => {}
    }

    matches!(status.as_u16(), 408 | 409 | 429 | 500..=599)
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}

/// Final result of a retried request.
#[derive(Debug)]
pub enum RetryOutcome {
    /// 2xx response.
    Success(Response),
    /// Non-2xx response that was not (or no longer) retryable.
    HttpError(Response),
    /// Transport failure on the last allowed attempt.
    ConnectionError {
        attempts: u32,
        source: reqwest::Error,
    },
}

/// Sends the request built by `build_request`, retrying per `policy`.
///
/// `build_request` is called once per attempt.
pub async fn send_with_retry<F>(build_request: F, policy: &RetryPolicy) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        let can_retry = attempt < policy.max_retries;

        match build_request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return RetryOutcome::Success(response);
                }
                if !can_retry || !should_retry(status, response.headers()) {
                    return RetryOutcome::HttpError(response);
                }

                let delay = policy.delay_for(attempt, Some(response.headers()));
                tracing::debug!(
                    status = %status,
                    retry = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying request after error status"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if !can_retry || !is_retryable_error(&e) {
                    return RetryOutcome::ConnectionError {
                        attempts: attempt + 1,
                        source: e,
                    };
                }

                let delay = policy.delay_for(attempt, None);
                tracing::debug!(
                    error = %e,
                    retry = attempt + 1,
                    delay_ms = delay.as_millis(),
                    "Retrying request after connection error"
                );
                tokio::time::sleep(delay).await;
            }
        }

        attempt += 1;
    }
}
