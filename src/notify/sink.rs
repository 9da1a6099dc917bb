use rand::Rng;
use reqwest::header::RETRY_AFTER;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::MessagePayload;

/// Why a message was not delivered
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("webhook rejected message with HTTP {status}")]
    Rejected { status: u16 },

    #[error("webhook request failed: {0}")]
    Transport(String),

    #[error("webhook delivery gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Successful delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// HTTP requests made, 0 when nothing was sent
    pub attempts: u32,
}

/// Destination for rendered notifications
pub trait Notifier {
    async fn deliver(&self, payload: &MessagePayload) -> Result<DeliveryReport, DeliveryError>;
}

/// Status line and backoff hint from one webhook POST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
}

impl WebhookResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
        }
    }
}

/// The request never produced an HTTP response
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub retryable: bool,
}

/// One POST of a JSON message body to a URL
pub trait WebhookTransport {
    async fn post(
        &self,
        url: &str,
        payload: &MessagePayload,
    ) -> Result<WebhookResponse, TransportError>;
}

/// reqwest-backed transport. The body carries the text under both
/// `content` (Discord) and `text` (Slack-style) keys.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("agent-notifier/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl WebhookTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        payload: &MessagePayload,
    ) -> Result<WebhookResponse, TransportError> {
        let body = serde_json::json!({
            "content": payload.text,
            "text": payload.text,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError {
                retryable: e.is_timeout() || e.is_connect() || e.is_request(),
                message: e.to_string(),
            })?;

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);

        Ok(WebhookResponse {
            status: response.status().as_u16(),
            retry_after,
        })
    }
}

/// `Retry-After` in delay-seconds form. HTTP-dates and anything that is not
/// a whole number of seconds are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Backoff parameters for webhook delivery
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for any single delay, including server hints
    pub max_delay: Duration,
    /// Multiplier applied after each retry
    pub backoff_factor: f64,
    /// Random jitter as a fraction of the delay (0.1 = ±10%)
    pub jitter_percent: f64,
    /// Total requests allowed per message, first one included
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay after the given failed attempt (0-indexed), jitter applied
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;

        let exp = retry.min(31) as i32;
        let base_ms = (initial_ms as f64) * self.backoff_factor.max(1.0).powi(exp);
        let base_ms = base_ms.min(max_ms as f64);

        let jitter = if self.jitter_percent > 0.0 && base_ms > 0.0 {
            let range = base_ms * self.jitter_percent.clamp(0.0, 1.0);
            rand::rng().random_range(-range..=range)
        } else {
            0.0
        };

        Duration::from_millis((base_ms + jitter).clamp(0.0, max_ms as f64) as u64)
    }
}

/// Attempt counter for one message's delivery
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a RetryPolicy,
    attempt: u32,
}

impl<'a> Backoff<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record the start of a request; returns its 1-based number
    pub fn start_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Delay before the next request, or `None` once the budget is spent.
    /// A server hint longer than the computed delay wins, up to `max_delay`.
    pub fn next_delay(&self, hint: Option<Duration>) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts.max(1) {
            return None;
        }
        let computed = self.policy.delay_for_retry(self.attempt.saturating_sub(1));
        let delay = hint.map_or(computed, |h| h.max(computed));
        Some(delay.min(self.policy.max_delay))
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Posts messages to a webhook URL
pub struct WebhookSink<T> {
    url: String,
    transport: T,
    policy: RetryPolicy,
}

impl<T: WebhookTransport> WebhookSink<T> {
    pub fn new(url: impl Into<String>, transport: T, policy: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            transport,
            policy,
        }
    }
}

impl<T: WebhookTransport> Notifier for WebhookSink<T> {
    async fn deliver(&self, payload: &MessagePayload) -> Result<DeliveryReport, DeliveryError> {
        let mut backoff = Backoff::new(&self.policy);

        loop {
            let attempt = backoff.start_attempt();
            let (reason, hint) = match self.transport.post(&self.url, payload).await {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    debug!(attempt, status = resp.status, "webhook delivered");
                    return Ok(DeliveryReport { attempts: attempt });
                }
                Ok(resp) if is_retryable_status(resp.status) => {
                    (format!("HTTP {}", resp.status), resp.retry_after)
                }
                Ok(resp) => {
                    warn!(attempt, status = resp.status, "webhook rejected message, dropping");
                    return Err(DeliveryError::Rejected {
                        status: resp.status,
                    });
                }
                Err(e) if e.retryable => (e.message, None),
                Err(e) => {
                    warn!(attempt, error = %e, "webhook request failed, dropping");
                    return Err(DeliveryError::Transport(e.message));
                }
            };

            match backoff.next_delay(hint) {
                Some(delay) => {
                    warn!(attempt, ?delay, %reason, "webhook delivery failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(attempt, %reason, "webhook delivery failed, giving up");
                    return Err(DeliveryError::Exhausted {
                        attempts: attempt,
                        last_error: reason,
                    });
                }
            }
        }
    }
}

/// Logs messages instead of sending them
#[derive(Debug, Default)]
pub struct DryRunNotifier;

impl Notifier for DryRunNotifier {
    async fn deliver(&self, payload: &MessagePayload) -> Result<DeliveryReport, DeliveryError> {
        info!(message = %payload.text, "dry run, notification not sent");
        Ok(DeliveryReport { attempts: 0 })
    }
}
