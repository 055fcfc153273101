//! Prometheus metrics for hlgate.
//!
//! Covers:
//! - Order admission outcomes
//! - Circuit breaker trips and open state per path
//! - Rolling drawdown and budget trigger state
//! - Rate limiter waits and timeouts per channel
//! - Submission attempts by classified outcome
//! - Live guard downgrades
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error that must surface at
//! first use rather than be silently dropped.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Order bus outcomes.
/// Labels: outcome (accepted/clipped/duplicate/rejected/error)
pub static ORDERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlgate_orders_total",
        "Order bus submissions by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Circuit breaker trips.
pub static BREAKER_TRIPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlgate_breaker_trips_total",
        "Circuit breaker trips by path",
        &["path"]
    )
    .unwrap()
});

/// Circuit breaker open state (1 = open).
pub static BREAKER_OPEN: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "hlgate_breaker_open",
        "Circuit breaker open state (1=open)",
        &["path"]
    )
    .unwrap()
});

/// Rolling drawdown percentage.
pub static BUDGET_DRAWDOWN_PCT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "hlgate_budget_drawdown_pct",
        "Rolling PnL drawdown as percent of initial balance"
    )
    .unwrap()
});

/// Budget guard trigger state (1 = triggered).
pub static BUDGET_TRIGGERED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "hlgate_budget_triggered",
        "Budget guard trigger state (1=triggered)"
    )
    .unwrap()
});

/// Time spent waiting for rate limit tokens.
pub static RATE_LIMIT_WAIT_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "hlgate_rate_limit_wait_ms",
        "Time waited for rate limiter tokens in milliseconds",
        &["channel"],
        vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 500.0, 1000.0]
    )
    .unwrap()
});

/// Rate limiter acquisitions that gave up.
pub static RATE_LIMIT_TIMEOUTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlgate_rate_limit_timeouts_total",
        "Rate limiter acquisitions that exceeded their timeout",
        &["channel"]
    )
    .unwrap()
});

/// Exchange send attempts.
/// Labels: outcome (success/rate_limit/auth/invalid/network/unknown)
pub static SEND_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlgate_send_attempts_total",
        "Exchange send attempts by classified outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Live executions downgraded to dry run.
pub static LIVE_GUARD_DOWNGRADES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hlgate_live_guard_downgrades_total",
        "Executions downgraded to dry run by reason",
        &["reason"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record an order bus outcome.
    pub fn order_outcome(outcome: &str) {
        ORDERS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a breaker trip.
    pub fn breaker_tripped(path: &str) {
        BREAKER_TRIPS_TOTAL.with_label_values(&[path]).inc();
        BREAKER_OPEN.with_label_values(&[path]).set(1.0);
    }

    /// Record a breaker closing (success or cooldown).
    pub fn breaker_closed(path: &str) {
        BREAKER_OPEN.with_label_values(&[path]).set(0.0);
    }

    /// Set current drawdown.
    pub fn budget_drawdown(pct: f64) {
        BUDGET_DRAWDOWN_PCT.set(pct);
    }

    /// Set budget trigger state.
    pub fn budget_triggered(triggered: bool) {
        BUDGET_TRIGGERED.set(if triggered { 1.0 } else { 0.0 });
    }

    /// Record time waited for tokens.
    pub fn rate_limit_wait(channel: &str, wait_ms: f64) {
        RATE_LIMIT_WAIT_MS
            .with_label_values(&[channel])
            .observe(wait_ms);
    }

    /// Record a rate limiter timeout.
    pub fn rate_limit_timeout(channel: &str) {
        RATE_LIMIT_TIMEOUTS_TOTAL
            .with_label_values(&[channel])
            .inc();
    }

    /// Record one exchange send attempt.
    pub fn send_attempt(outcome: &str) {
        SEND_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a live guard downgrade.
    pub fn live_guard_downgrade(reason: &str) {
        LIVE_GUARD_DOWNGRADES_TOTAL
            .with_label_values(&[reason])
            .inc();
    }

    /// Render the default registry in Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
