//! Accrual authority client.
//!
//! The authority exposes a single read endpoint,
//! `GET {base}/api/orders/{number}`, answering with its current view of an
//! order's reward calculation. This crate owns the polling contract only:
//! typed outcomes, bounded retry with exponential backoff, and status
//! normalization. What to do with a reply is the worker pool's business.

use std::time::Duration;

use mart_schemas::AccrualReply;
use thiserror::Error;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Retry and timeout policy for one [`AccrualClient::fetch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualSettings {
    /// Hard cap for a single HTTP attempt.
    pub request_timeout: Duration,
    /// Backoff after failed attempt `k` is `retry_base_delay * 2^(k-1)`.
    pub retry_base_delay: Duration,
    /// Total attempts, the first one included.
    pub max_attempts: u32,
}

impl Default for AccrualSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(1000),
            retry_base_delay: Duration::from_millis(500),
            max_attempts: 3,
        }
    }
}

/// Backoff to sleep after failed attempt `attempt` (1-based).
///
/// Pure so the schedule is testable without a clock: with the defaults the
/// sequence is 500ms, 1s, 2s, ... The factor saturates instead of
/// overflowing for absurd attempt counts.
pub fn backoff_delay(settings: &AccrualSettings, attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    settings.retry_base_delay.saturating_mul(factor)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure modes of one polling call, shaped for the worker pool to branch on.
#[derive(Debug, Error)]
pub enum AccrualError {
    /// The authority answered 204: it has never heard of this order.
    #[error("accrual authority has no record of order {0}")]
    NotFound(String),
    /// Every attempt failed with a retryable condition.
    #[error("accrual authority gave no answer after {attempts} attempts: {last}")]
    NoAnswer { attempts: u32, last: String },
    /// A 200 body that does not decode as a reply.
    #[error("accrual reply for order {number} undecodable: {detail}")]
    Decode { number: String, detail: String },
    /// A status code outside the protocol (neither 200, 204, 429 nor 5xx).
    #[error("accrual authority answered unexpected status {status}")]
    Unexpected { status: u16 },
}

// ---------------------------------------------------------------------------
// Client contract
// ---------------------------------------------------------------------------

/// Read-only polling contract against the accrual authority.
///
/// Implementations must be `Send + Sync`: the worker pool shares one client
/// across all workers.
#[async_trait::async_trait]
pub trait AccrualClient: Send + Sync {
    /// Fetch the authority's current view of `number`.
    ///
    /// Replies are normalized before they are returned, so REGISTERED never
    /// escapes this boundary.
    async fn fetch(&self, number: &str) -> Result<AccrualReply, AccrualError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// HTTP client against a live accrual authority.
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    http: reqwest::Client,
    base_url: String,
    settings: AccrualSettings,
}

impl HttpAccrualClient {
    pub fn new(base_url: String) -> Self {
        Self::with_settings(base_url, AccrualSettings::default())
    }

    pub fn with_settings(base_url: String, settings: AccrualSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            settings,
        }
    }

    fn build_order_url(&self, number: &str) -> String {
        format!("{}/api/orders/{number}", self.base_url.trim_end_matches('/'))
    }

    /// One wire round trip. Separated from the retry loop so every exit is
    /// explicitly either retryable or final.
    async fn attempt(&self, number: &str) -> Result<AccrualReply, Attempt> {
        let resp = self
            .http
            .get(self.build_order_url(number))
            .timeout(self.settings.request_timeout)
            .send()
            .await
            .map_err(|e| Attempt::Retry(format!("transport: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Err(Attempt::Final(AccrualError::NotFound(number.to_string())));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Attempt::Retry(format!("status {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(Attempt::Final(AccrualError::Unexpected {
                status: status.as_u16(),
            }));
        }

        let mut reply: AccrualReply = resp.json().await.map_err(|e| {
            Attempt::Final(AccrualError::Decode {
                number: number.to_string(),
                detail: e.to_string(),
            })
        })?;
        reply.status = reply.status.normalized();
        Ok(reply)
    }
}

/// Outcome of a single attempt inside the retry loop.
enum Attempt {
    /// Worth another try after backoff.
    Retry(String),
    /// No retry will change the answer.
    Final(AccrualError),
}

#[async_trait::async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn fetch(&self, number: &str) -> Result<AccrualReply, AccrualError> {
        let mut last = String::new();
        for attempt in 1..=self.settings.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(backoff_delay(&self.settings, attempt - 1)).await;
            }
            match self.attempt(number).await {
                Ok(reply) => {
                    debug!(number, attempt, status = reply.status.as_str(), "accrual reply");
                    return Ok(reply);
                }
                Err(Attempt::Final(err)) => return Err(err),
                Err(Attempt::Retry(reason)) => {
                    warn!(number, attempt, %reason, "accrual attempt failed");
                    last = reason;
                }
            }
        }
        Err(AccrualError::NoAnswer {
            attempts: self.settings.max_attempts,
            last,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests (no network)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_the_wire_contract() {
        let s = AccrualSettings::default();
        assert_eq!(s.request_timeout, Duration::from_millis(1000));
        assert_eq!(s.retry_base_delay, Duration::from_millis(500));
        assert_eq!(s.max_attempts, 3);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let s = AccrualSettings::default();
        assert_eq!(backoff_delay(&s, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&s, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&s, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&s, 4), Duration::from_millis(4000));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let s = AccrualSettings {
            retry_base_delay: Duration::from_secs(1),
            ..AccrualSettings::default()
        };
        // Attempt numbers far beyond any real schedule must stay finite.
        let huge = backoff_delay(&s, 40);
        assert_eq!(huge, Duration::from_secs(1).saturating_mul(u32::MAX));
        assert!(backoff_delay(&s, 100) >= backoff_delay(&s, 40));
    }

    #[test]
    fn backoff_attempt_zero_behaves_like_attempt_one() {
        let s = AccrualSettings::default();
        assert_eq!(backoff_delay(&s, 0), backoff_delay(&s, 1));
    }

    #[test]
    fn order_url_is_joined_without_double_slash() {
        let client = HttpAccrualClient::new("http://accrual.local/".to_string());
        assert_eq!(
            client.build_order_url("12345678903"),
            "http://accrual.local/api/orders/12345678903"
        );
    }
}
