//! Token bucket rate limiting for outbound exchange calls.
//!
//! Refill is lazy: each acquire adds `elapsed * rps` tokens capped at
//! `burst`. A caller short of tokens sleeps for the computed shortfall with
//! the lock released, so waiters are not served in FIFO order. Tokens are
//! only ever taken in full; a call that gives up leaves the bucket as it was.

use std::sync::Arc;
use std::time::Duration;

use hlgate_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{ExecutorError, ExecutorResult};

/// Absorbs float drift between the computed wait and the refill.
const TOKEN_EPSILON: f64 = 1e-9;

/// Rate for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Refill rate in tokens per second. `0` disables refill; negative is rejected.
    pub rps: f64,
    /// Capacity.
    pub burst: f64,
}

/// Rate limiter configuration for both exchange channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_info_bucket")]
    pub info: BucketConfig,
    #[serde(default = "default_order_bucket")]
    pub order: BucketConfig,
    /// Default acquire timeout used by the submission client.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_info_bucket() -> BucketConfig {
    BucketConfig {
        rps: 10.0,
        burst: 20.0,
    }
}

fn default_order_bucket() -> BucketConfig {
    BucketConfig {
        rps: 5.0,
        burst: 20.0,
    }
}

fn default_acquire_timeout_ms() -> u64 {
    200
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            info: default_info_bucket(),
            order: default_order_bucket(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

/// Counters for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    pub tokens_available: f64,
    pub tokens_consumed: f64,
    pub total_wait_ms: u64,
    pub timeouts: u64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    consumed: f64,
    total_wait: Duration,
    timeouts: u64,
}

/// Token bucket shared by every caller of one channel.
#[derive(Debug)]
pub struct TokenBucket {
    channel: String,
    rps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(channel: impl Into<String>, config: &BucketConfig) -> ExecutorResult<Self> {
        let channel = channel.into();
        if !(config.burst.is_finite() && config.burst > 0.0) {
            return Err(ExecutorError::InvalidConfig(format!(
                "rate limit burst for {channel} must be positive, got {}",
                config.burst
            )));
        }
        if !(config.rps.is_finite() && config.rps >= 0.0) {
            return Err(ExecutorError::InvalidConfig(format!(
                "rate limit rps for {channel} must be finite and non-negative, got {}",
                config.rps
            )));
        }
        Ok(Self {
            channel,
            rps: config.rps,
            burst: config.burst,
            state: Mutex::new(BucketState {
                tokens: config.burst,
                last_refill: Instant::now(),
                consumed: 0.0,
                total_wait: Duration::ZERO,
                timeouts: 0,
            }),
        })
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Take `tokens`, waiting at most `timeout` for them.
    ///
    /// Returns false without consuming anything when the tokens cannot be
    /// had within the timeout. `tokens` must be positive and finite.
    pub async fn acquire(&self, tokens: f64, timeout: Duration) -> bool {
        if !(tokens.is_finite() && tokens > 0.0) {
            debug!(channel = %self.channel, tokens, "Invalid token request");
            return false;
        }

        let started = Instant::now();
        // None when the timeout is too large to represent: wait without bound
        let deadline = started.checked_add(timeout);

        if tokens > self.burst {
            debug!(
                channel = %self.channel,
                tokens,
                burst = self.burst,
                "Request exceeds bucket capacity"
            );
            self.record_timeout().await;
            return false;
        }

        loop {
            let locked = match deadline {
                Some(d) => tokio::time::timeout_at(d, self.state.lock()).await.ok(),
                None => Some(self.state.lock().await),
            };
            let Some(mut state) = locked else {
                debug!(channel = %self.channel, "Timed out waiting for rate limiter lock");
                Metrics::rate_limit_timeout(&self.channel);
                return false;
            };

            self.refill(&mut state);
            if state.tokens + TOKEN_EPSILON >= tokens {
                state.tokens = (state.tokens - tokens).max(0.0);
                state.consumed += tokens;
                let waited = started.elapsed();
                state.total_wait += waited;
                Metrics::rate_limit_wait(&self.channel, waited.as_secs_f64() * 1000.0);
                return true;
            }

            if self.rps <= 0.0 {
                return self.give_up(&mut state);
            }
            let Ok(wait) = Duration::try_from_secs_f64((tokens - state.tokens) / self.rps) else {
                return self.give_up(&mut state);
            };
            match Instant::now().checked_add(wait) {
                Some(ready) if deadline.map_or(true, |d| ready <= d) => {}
                _ => return self.give_up(&mut state),
            }
            drop(state);
            tokio::time::sleep(wait).await;
        }
    }

    /// Snapshot of the bucket after a lazy refill.
    pub async fn stats(&self) -> BucketStats {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        BucketStats {
            tokens_available: state.tokens,
            tokens_consumed: state.consumed,
            total_wait_ms: state.total_wait.as_millis() as u64,
            timeouts: state.timeouts,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        if self.rps > 0.0 {
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.rps).min(self.burst);
        }
        state.last_refill = now;
    }

    fn give_up(&self, state: &mut BucketState) -> bool {
        state.timeouts += 1;
        debug!(
            channel = %self.channel,
            available = state.tokens,
            "Rate limiter timeout"
        );
        Metrics::rate_limit_timeout(&self.channel);
        false
    }

    async fn record_timeout(&self) {
        self.state.lock().await.timeouts += 1;
        Metrics::rate_limit_timeout(&self.channel);
    }
}

/// Exchange call channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Info,
    Order,
}

/// One bucket per channel.
#[derive(Debug)]
pub struct RateLimiters {
    info: Arc<TokenBucket>,
    order: Arc<TokenBucket>,
    acquire_timeout: Duration,
}

impl RateLimiters {
    pub fn new(config: &RateLimitConfig) -> ExecutorResult<Self> {
        Ok(Self {
            info: Arc::new(TokenBucket::new("info", &config.info)?),
            order: Arc::new(TokenBucket::new("order", &config.order)?),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        })
    }

    #[must_use]
    pub fn bucket(&self, channel: Channel) -> &Arc<TokenBucket> {
        match channel {
            Channel::Info => &self.info,
            Channel::Order => &self.order,
        }
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Take one token from `channel` with the configured timeout.
    pub async fn acquire(&self, channel: Channel) -> bool {
        self.bucket(channel).acquire(1.0, self.acquire_timeout).await
    }
}
