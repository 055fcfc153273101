//! Resilient order submission.
//!
//! `SubmissionClient` wraps an opaque `ExecutionClient` with error
//! classification, per-attempt rate limiting and exponential backoff with
//! jitter. Auth and Invalid failures are final; RateLimit, Network and
//! Unknown are retried up to `max_retries` times.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use hlgate_core::{DenialKind, OrderId, OrderIntent, TimeInForce};
use hlgate_telemetry::Metrics;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::rate_limiter::TokenBucket;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

// ============================================================================
// Wire types
// ============================================================================

/// Order as handed to the exchange client. Signing and wire encoding are the
/// client's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub client_order_id: String,
    pub asset: u32,
    pub is_buy: bool,
    pub size: Decimal,
    /// None for market orders.
    pub limit_px: Option<Decimal>,
    pub reduce_only: bool,
    pub tif: TimeInForce,
    pub nonce: u64,
}

impl OrderPayload {
    #[must_use]
    pub fn from_order(order_id: &OrderId, intent: &OrderIntent) -> Self {
        Self {
            client_order_id: order_id.as_str().to_string(),
            asset: intent.symbol.asset_index(),
            is_buy: intent.side.is_buy(),
            size: intent.size.inner(),
            limit_px: intent.limit_px.map(|p| p.inner()),
            reduce_only: intent.reduce_only,
            tif: intent.tif,
            nonce: hlgate_core::now_ms(),
        }
    }
}

/// Successful exchange acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeResponse {
    pub order_id: Option<String>,
    pub raw: Value,
}

/// Failure reported by an exchange client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        retry_after_secs: Option<u64>,
        body: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Exchange error: {0}")]
    Exchange(String),
}

/// Opaque network call to the exchange.
pub trait ExecutionClient: Send + Sync {
    fn send_order<'a>(
        &'a self,
        payload: &'a OrderPayload,
    ) -> BoxFuture<'a, Result<ExchangeResponse, ExchangeError>>;
}

// ============================================================================
// Classification
// ============================================================================

/// Classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    RateLimit,
    Auth,
    Invalid,
    Network,
    Unknown,
}

impl ErrorType {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Network | Self::Unknown)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Invalid => "invalid",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn denial_kind(&self) -> DenialKind {
        match self {
            Self::RateLimit => DenialKind::RateLimited,
            Self::Auth => DenialKind::AuthFailure,
            Self::Invalid => DenialKind::InvalidRequest,
            Self::Network => DenialKind::NetworkFailure,
            Self::Unknown => DenialKind::UnknownFailure,
        }
    }

    /// Classify an exchange-reported message by keyword.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        if has(&["rate limit", "too many requests"]) {
            Self::RateLimit
        } else if has(&["unauthorized", "forbidden", "auth"]) {
            Self::Auth
        } else if has(&["invalid", "bad request"]) {
            Self::Invalid
        } else if has(&["network", "timeout", "connection"]) {
            Self::Network
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one failed call, with the server's retry hint.
fn classify(err: &ExchangeError) -> (ErrorType, Option<Duration>) {
    match err {
        ExchangeError::Http {
            status,
            retry_after_secs,
            ..
        } => match *status {
            429 => (
                ErrorType::RateLimit,
                retry_after_secs.map(Duration::from_secs),
            ),
            401 | 403 => (ErrorType::Auth, None),
            400 => (ErrorType::Invalid, None),
            s if s >= 500 => (ErrorType::Network, None),
            _ => (ErrorType::Unknown, None),
        },
        ExchangeError::Transport(_) => (ErrorType::Network, None),
        ExchangeError::Exchange(msg) => (ErrorType::from_message(msg), None),
    }
}

/// Outcome of `SubmissionClient::send_order`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub error_type: Option<ErrorType>,
    pub error_message: Option<String>,
    /// Server-provided wait before retrying.
    #[serde(with = "optional_secs")]
    pub retry_after: Option<Duration>,
    /// Exchange calls made (0 for dry runs).
    pub attempts: u32,
    pub raw_response: Option<Value>,
}

impl SendResult {
    fn ok(order_id: String, attempts: u32, raw_response: Option<Value>) -> Self {
        Self {
            success: true,
            order_id: Some(order_id),
            error_type: None,
            error_message: None,
            retry_after: None,
            attempts,
            raw_response,
        }
    }

    fn failure(
        error_type: ErrorType,
        message: String,
        retry_after: Option<Duration>,
        attempts: u32,
    ) -> Self {
        Self {
            success: false,
            order_id: None,
            error_type: Some(error_type),
            error_message: Some(message),
            retry_after,
            attempts,
            raw_response: None,
        }
    }

    /// Denial classification of a failed send.
    #[must_use]
    pub fn denial_kind(&self) -> Option<DenialKind> {
        self.error_type.map(|t| t.denial_kind())
    }
}

mod optional_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fractional jitter applied to every backoff delay (0.1 = ±10%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Overall budget for one `send_order` call, including sleeps.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.1
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            deadline_ms: None,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt + 1`:
    /// `min(base * 2^attempt, max)` with jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
            .min(self.max_delay_ms);
        Duration::from_millis(apply_jitter(base, self.jitter))
    }
}

fn apply_jitter(delay_ms: u64, jitter: f64) -> u64 {
    if jitter <= 0.0 || delay_ms == 0 {
        return delay_ms;
    }
    let range = delay_ms as f64 * jitter;
    let min = (delay_ms as f64 - range).max(0.0);
    let max = delay_ms as f64 + range;
    let mut rng = rand::rng();
    rng.random_range(min..=max) as u64
}

// ============================================================================
// SubmissionClient
// ============================================================================

/// Retrying front end for an `ExecutionClient`.
pub struct SubmissionClient {
    client: Arc<dyn ExecutionClient>,
    limiter: Arc<TokenBucket>,
    acquire_timeout: Duration,
    retry: RetryConfig,
}

impl SubmissionClient {
    #[must_use]
    pub fn new(
        client: Arc<dyn ExecutionClient>,
        limiter: Arc<TokenBucket>,
        acquire_timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            acquire_timeout,
            retry,
        }
    }

    #[must_use]
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Send an order. A dry run makes no call and always succeeds.
    pub async fn send_order(&self, payload: &OrderPayload, dry_run: bool) -> SendResult {
        let budget = self.retry.deadline_ms.map(Duration::from_millis);
        self.send_order_within(payload, dry_run, budget).await
    }

    /// `send_order` with an explicit overall budget. No retry is started
    /// whose delay would end past the budget.
    pub async fn send_order_within(
        &self,
        payload: &OrderPayload,
        dry_run: bool,
        budget: Option<Duration>,
    ) -> SendResult {
        if dry_run {
            let id = format!("dry_run_{}", uuid::Uuid::new_v4().simple());
            debug!(
                client_order_id = %payload.client_order_id,
                order_id = %id,
                "Dry run, no exchange call"
            );
            Metrics::send_attempt("dry_run");
            return SendResult::ok(id, 0, None);
        }

        let deadline = budget.map(|b| Instant::now() + b);
        let mut calls = 0u32;
        let mut try_index = 0u32;

        loop {
            let mut result = self.attempt(payload, deadline).await;
            calls += result.attempts;
            result.attempts = calls;

            let Some(error_type) = result.error_type else {
                info!(
                    client_order_id = %payload.client_order_id,
                    order_id = ?result.order_id,
                    attempts = calls,
                    "Order accepted by exchange"
                );
                return result;
            };

            if !error_type.is_retryable() {
                error!(
                    client_order_id = %payload.client_order_id,
                    error_type = %error_type,
                    error = ?result.error_message,
                    "Order failed, not retrying"
                );
                return result;
            }

            if try_index >= self.retry.max_retries {
                warn!(
                    client_order_id = %payload.client_order_id,
                    error_type = %error_type,
                    attempts = calls,
                    "Retries exhausted"
                );
                return result;
            }

            let delay = match (error_type, result.retry_after) {
                (ErrorType::RateLimit, Some(after)) => after,
                _ => self.retry.backoff(try_index),
            };
            if deadline.is_some_and(|d| Instant::now() + delay > d) {
                warn!(
                    client_order_id = %payload.client_order_id,
                    error_type = %error_type,
                    delay_ms = delay.as_millis() as u64,
                    "Retry would exceed deadline, giving up"
                );
                return result;
            }

            warn!(
                client_order_id = %payload.client_order_id,
                error_type = %error_type,
                attempt = try_index + 1,
                delay_ms = delay.as_millis() as u64,
                "Order send failed, retrying"
            );
            tokio::time::sleep(delay).await;
            try_index += 1;
        }
    }

    /// One rate-limited call. `attempts` is 1 when the exchange was called.
    /// With a deadline the call itself is abandoned once it passes.
    async fn attempt(&self, payload: &OrderPayload, deadline: Option<Instant>) -> SendResult {
        let timeout = match deadline {
            Some(d) => self
                .acquire_timeout
                .min(d.saturating_duration_since(Instant::now())),
            None => self.acquire_timeout,
        };
        if !self.limiter.acquire(1.0, timeout).await {
            Metrics::send_attempt("local_rate_limit");
            return SendResult::failure(
                ErrorType::RateLimit,
                "local rate limiter timeout".to_string(),
                None,
                0,
            );
        }

        let call = self.client.send_order(payload);
        let outcome = match deadline {
            Some(d) => match tokio::time::timeout_at(d, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    Metrics::send_attempt("deadline");
                    warn!(
                        client_order_id = %payload.client_order_id,
                        "Exchange call still pending at deadline, abandoned"
                    );
                    return SendResult::failure(
                        ErrorType::Network,
                        "deadline exceeded".to_string(),
                        None,
                        1,
                    );
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(response) => {
                Metrics::send_attempt("success");
                let order_id = response
                    .order_id
                    .unwrap_or_else(|| payload.client_order_id.clone());
                SendResult::ok(order_id, 1, Some(response.raw))
            }
            Err(err) => {
                let (error_type, retry_after) = classify(&err);
                Metrics::send_attempt(error_type.as_str());
                SendResult::failure(error_type, err.to_string(), retry_after, 1)
            }
        }
    }
}

// ============================================================================
// Mock client
// ============================================================================

/// Scripted exchange client for testing.
///
/// Returns queued results in order, then the default result.
#[derive(Debug)]
pub struct MockExecutionClient {
    script: Mutex<VecDeque<Result<ExchangeResponse, ExchangeError>>>,
    default_result: Mutex<Result<ExchangeResponse, ExchangeError>>,
    calls: Mutex<Vec<(Instant, OrderPayload)>>,
    latency: Mutex<Duration>,
}

impl Default for MockExecutionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutionClient {
    /// Create a mock that accepts every order.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_result: Mutex::new(Ok(ExchangeResponse {
                order_id: None,
                raw: serde_json::json!({ "status": "ok" }),
            })),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Queue a result for the next unanswered call.
    pub fn push_result(&self, result: Result<ExchangeResponse, ExchangeError>) {
        self.script.lock().push_back(result);
    }

    /// Result returned once the script is exhausted.
    pub fn set_default_result(&self, result: Result<ExchangeResponse, ExchangeError>) {
        *self.default_result.lock() = result;
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Call times, oldest first.
    #[must_use]
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(t, _)| *t).collect()
    }

    #[must_use]
    pub fn payloads(&self) -> Vec<OrderPayload> {
        self.calls.lock().iter().map(|(_, p)| p.clone()).collect()
    }
}

impl ExecutionClient for MockExecutionClient {
    fn send_order<'a>(
        &'a self,
        payload: &'a OrderPayload,
    ) -> BoxFuture<'a, Result<ExchangeResponse, ExchangeError>> {
        Box::pin(async move {
            self.calls.lock().push((Instant::now(), payload.clone()));
            let latency = *self.latency.lock();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let scripted = self.script.lock().pop_front();
            scripted.unwrap_or_else(|| self.default_result.lock().clone())
        })
    }
}
