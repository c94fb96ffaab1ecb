//! Retry policy for upstream calls
//!
//! Retries are driven by response status: only statuses listed in
//! `on_status_codes` are retried, at most `attempts` times (never more than
//! [`MAX_RETRY_ATTEMPTS`]). The wait between attempts is either a fixed delay
//! or the provider's `Retry-After` hint when the target opts in.

use crate::config::{RetrySettings, MAX_RETRY_ATTEMPTS};
use crate::error::GatewayError;
use crate::http::error::parse_retry_after;
use crate::protocol::response::GatewayResponse;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Longest `Retry-After` hint the gateway will wait for
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first call
    pub attempts: u32,
    pub on_status_codes: Vec<u16>,
    pub use_retry_after_header: bool,
    pub delay: Duration,
}

/// What to do before the next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDelay {
    Wait(Duration),
    /// The provider asked for a longer wait than the gateway allows
    GiveUp,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            attempts: settings.attempts.min(MAX_RETRY_ATTEMPTS),
            on_status_codes: settings.on_status_codes.clone(),
            use_retry_after_header: settings.use_retry_after_header,
            delay: Duration::from_millis(settings.delay_ms),
        }
    }

    pub fn is_retriable(&self, status: StatusCode) -> bool {
        self.on_status_codes.contains(&status.as_u16())
    }

    /// Whether a response with `status` may be retried after `retries_done` retries
    pub fn should_retry(&self, status: StatusCode, retries_done: u32) -> bool {
        retries_done < self.attempts && self.is_retriable(status)
    }

    /// Delay before the next attempt, given the last response's headers
    pub fn calculate_delay(&self, headers: &HeaderMap) -> RetryDelay {
        if self.use_retry_after_header {
            if let Some(hint) = parse_retry_after(headers) {
                if hint > MAX_RETRY_AFTER {
                    return RetryDelay::GiveUp;
                }
                return RetryDelay::Wait(hint);
            }
        }
        RetryDelay::Wait(self.delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// Result of a retried dispatch
#[derive(Debug)]
pub struct RetryOutcome {
    pub response: GatewayResponse,
    /// Retries performed, cumulative across every loop of the dispatch
    pub attempts_used: u32,
    /// Retrying stopped early (oversized `Retry-After` or deadline)
    pub skipped: bool,
    pub created_at: Instant,
}

/// Executor for retry operations
pub struct RetryExecutor<'a> {
    policy: &'a RetryPolicy,
    deadline: Option<Instant>,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            deadline: None,
        }
    }

    /// Stop retrying once waiting would pass `deadline`
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run `operation` until it returns a non-retriable status or the budget is spent.
    ///
    /// `retries_done` is the number of retries already consumed by the caller.
    /// Errors (no response at all) are returned immediately.
    pub async fn execute<F, Fut>(
        &self,
        retries_done: u32,
        mut operation: F,
    ) -> Result<RetryOutcome, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<GatewayResponse, GatewayError>>,
    {
        let mut used = retries_done;
        loop {
            let response = operation(used).await?;
            let status = response.status;

            if !self.policy.should_retry(status, used) {
                return Ok(self.outcome(response, used, false));
            }

            let wait = match self.policy.calculate_delay(&response.headers) {
                RetryDelay::Wait(wait) => wait,
                RetryDelay::GiveUp => {
                    warn!(
                        "Retry-After for status {} exceeds {:?}, not retrying",
                        status, MAX_RETRY_AFTER
                    );
                    return Ok(self.outcome(response, used, true));
                }
            };

            if let Some(deadline) = self.deadline {
                if Instant::now().checked_add(wait).map_or(true, |at| at >= deadline) {
                    warn!("Deadline reached before retry {}, returning last response", used + 1);
                    return Ok(self.outcome(response, used, true));
                }
            }

            used += 1;
            debug!(
                "Status {} is retriable, retry {}/{} in {:?}",
                status, used, self.policy.attempts, wait
            );
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
    }

    fn outcome(&self, response: GatewayResponse, used: u32, skipped: bool) -> RetryOutcome {
        RetryOutcome {
            response,
            attempts_used: used,
            skipped,
            created_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::from_settings(&RetrySettings::new(attempts).with_delay_ms(0))
    }

    fn response(status: u16) -> GatewayResponse {
        GatewayResponse::json(StatusCode::from_u16(status).unwrap(), json!({}))
    }

    #[test]
    fn test_attempts_are_capped() {
        let p = RetryPolicy::from_settings(&RetrySettings::new(50));
        assert_eq!(p.attempts, MAX_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_retry_after_bounds() {
        let p = RetryPolicy::from_settings(
            &RetrySettings::new(1).with_retry_after_header(true).with_delay_ms(5),
        );
        let mut headers = HeaderMap::new();
        assert_eq!(p.calculate_delay(&headers), RetryDelay::Wait(Duration::from_millis(5)));

        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(p.calculate_delay(&headers), RetryDelay::Wait(Duration::from_secs(2)));

        headers.insert("retry-after", HeaderValue::from_static("120"));
        assert_eq!(p.calculate_delay(&headers), RetryDelay::GiveUp);
    }

    #[tokio::test]
    async fn test_absurd_retry_after_gives_up_without_panicking() {
        let p = RetryPolicy::from_settings(
            &RetrySettings::new(3).with_retry_after_header(true).with_delay_ms(0),
        );
        let calls = AtomicU32::new(0);
        let outcome = RetryExecutor::new(&p)
            .execute(0, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let mut resp = response(429);
                resp.headers.insert("retry-after", HeaderValue::from_static("1e20"));
                async move { Ok(resp) }
            })
            .await
            .unwrap();
        assert!(outcome.skipped);
        assert_eq!(outcome.attempts_used, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stops_on_success() {
        let calls = AtomicU32::new(0);
        let p = policy(3);
        let outcome = RetryExecutor::new(&p)
            .execute(0, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(response(if n == 0 { 503 } else { 200 })) }
            })
            .await
            .unwrap();
        assert_eq!(outcome.response.status, StatusCode::OK);
        assert_eq!(outcome.attempts_used, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_listed_status_never_retried() {
        let calls = AtomicU32::new(0);
        let p = policy(3);
        let outcome = RetryExecutor::new(&p)
            .execute(0, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(response(400)) }
            })
            .await
            .unwrap();
        assert_eq!(outcome.attempts_used, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_shared_with_caller() {
        let calls = AtomicU32::new(0);
        let p = policy(2);
        let outcome = RetryExecutor::new(&p)
            .execute(1, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(response(429)) }
            })
            .await
            .unwrap();
        assert_eq!(outcome.attempts_used, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
