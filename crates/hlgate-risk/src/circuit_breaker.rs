//! Per-path circuit breakers.
//!
//! A breaker counts failures in a sliding window and trips when the count
//! reaches the threshold. While tripped, callers skip the path until the
//! cooldown elapses, after which the breaker closes on its own. A single
//! success closes it immediately and forgets every recorded failure.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use hlgate_core::now_ms;
use hlgate_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Path key for exchange info (read) calls.
pub const INFO_API: &str = "info-api";
/// Path key for exchange order (write) calls.
pub const ORDER_API: &str = "order-api";

// ============================================================================
// Config
// ============================================================================

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Sliding window for counting failures.
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,
    /// Failures within the window that trip the breaker. 0 disables tripping.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cooldown after a trip before the breaker closes on its own.
    #[serde(default = "default_reset_after_secs")]
    pub reset_after_secs: u64,
}

fn default_failure_window_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_after_secs() -> u64 {
    60
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_window_secs: default_failure_window_secs(),
            failure_threshold: default_failure_threshold(),
            reset_after_secs: default_reset_after_secs(),
        }
    }
}

/// Snapshot of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub path: String,
    pub tripped: bool,
    /// Failures currently inside the window.
    pub failure_count: usize,
    pub last_failure_ms: Option<u64>,
    pub tripped_at_ms: Option<u64>,
}

// ============================================================================
// CircuitBreaker
// ============================================================================

#[derive(Debug, Default)]
struct BreakerState {
    /// Failure timestamps (ms), oldest first.
    failures: VecDeque<u64>,
    last_failure_ms: Option<u64>,
    tripped_at_ms: Option<u64>,
}

/// Sliding-window failure tracker for one downstream path.
///
/// Thread-safe: all state sits behind one mutex and no I/O happens while it
/// is held.
#[derive(Debug)]
pub struct CircuitBreaker {
    path: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(path: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            path: path.into(),
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Record a successful call. Closes the breaker and clears the window.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.failures.clear();
        if state.tripped_at_ms.take().is_some() {
            info!(path = %self.path, "Circuit breaker closed by success");
            Metrics::breaker_closed(&self.path);
        }
    }

    /// Record a failed call. Returns true if this failure tripped the breaker.
    pub fn record_failure(&self) -> bool {
        self.record_failure_at(now_ms())
    }

    /// Record a failure at a given time (for testing).
    pub fn record_failure_at(&self, now_ms: u64) -> bool {
        let mut state = self.state.lock();
        self.expire_trip(&mut state, now_ms);

        state.failures.push_back(now_ms);
        state.last_failure_ms = Some(now_ms);
        self.prune(&mut state, now_ms);

        let threshold = self.config.failure_threshold as usize;
        if threshold == 0 || state.tripped_at_ms.is_some() || state.failures.len() < threshold {
            return false;
        }

        state.tripped_at_ms = Some(now_ms);
        warn!(
            path = %self.path,
            failures = state.failures.len(),
            window_secs = self.config.failure_window_secs,
            reset_after_secs = self.config.reset_after_secs,
            "Circuit breaker tripped"
        );
        Metrics::breaker_tripped(&self.path);
        true
    }

    /// True while the breaker is tripped and its cooldown has not elapsed.
    pub fn should_skip(&self) -> bool {
        self.should_skip_at(now_ms())
    }

    /// Check skip state at a given time (for testing).
    pub fn should_skip_at(&self, now_ms: u64) -> bool {
        let mut state = self.state.lock();
        self.expire_trip(&mut state, now_ms);
        state.tripped_at_ms.is_some()
    }

    #[must_use]
    pub fn status(&self) -> BreakerStatus {
        self.status_at(now_ms())
    }

    /// Snapshot at a given time (for testing).
    #[must_use]
    pub fn status_at(&self, now_ms: u64) -> BreakerStatus {
        let mut state = self.state.lock();
        self.expire_trip(&mut state, now_ms);
        self.prune(&mut state, now_ms);
        BreakerStatus {
            path: self.path.clone(),
            tripped: state.tripped_at_ms.is_some(),
            failure_count: state.failures.len(),
            last_failure_ms: state.last_failure_ms,
            tripped_at_ms: state.tripped_at_ms,
        }
    }

    fn prune(&self, state: &mut BreakerState, now_ms: u64) {
        let window_ms = self.config.failure_window_secs * 1000;
        while state
            .failures
            .front()
            .is_some_and(|&t| now_ms.saturating_sub(t) >= window_ms)
        {
            state.failures.pop_front();
        }
    }

    fn expire_trip(&self, state: &mut BreakerState, now_ms: u64) {
        let Some(tripped_at) = state.tripped_at_ms else {
            return;
        };
        if now_ms.saturating_sub(tripped_at) >= self.config.reset_after_secs * 1000 {
            state.tripped_at_ms = None;
            info!(path = %self.path, "Circuit breaker cooldown elapsed, closing");
            Metrics::breaker_closed(&self.path);
        }
    }
}

// ============================================================================
// CircuitBreakers (registry)
// ============================================================================

/// Process-wide set of breakers keyed by path.
///
/// Breakers are created on first use with the path's override config, or the
/// default config when none is set.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    default_config: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    #[must_use]
    pub fn new(default_config: BreakerConfig, overrides: HashMap<String, BreakerConfig>) -> Self {
        Self {
            default_config,
            overrides,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for a path, created on first use.
    pub fn breaker(&self, path: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(path) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(path.to_string()).or_insert_with(|| {
            let config = self
                .overrides
                .get(path)
                .cloned()
                .unwrap_or_else(|| self.default_config.clone());
            Arc::new(CircuitBreaker::new(path, config))
        });
        Arc::clone(entry.value())
    }

    pub fn record_success(&self, path: &str) {
        self.breaker(path).record_success();
    }

    pub fn record_failure(&self, path: &str) -> bool {
        self.breaker(path).record_failure()
    }

    pub fn should_skip(&self, path: &str) -> bool {
        self.breaker(path).should_skip()
    }

    #[must_use]
    pub fn status(&self, path: &str) -> BreakerStatus {
        self.breaker(path).status()
    }

    /// Paths whose breaker is currently tripped, sorted.
    #[must_use]
    pub fn tripped_paths(&self) -> Vec<String> {
        self.tripped_paths_at(now_ms())
    }

    /// Tripped paths at a given time (for testing).
    #[must_use]
    pub fn tripped_paths_at(&self, now_ms: u64) -> Vec<String> {
        let mut paths: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|b| b.should_skip_at(now_ms))
            .map(|b| b.path().to_string())
            .collect();
        paths.sort();
        paths
    }

    /// Status of every known breaker, keyed by path.
    #[must_use]
    pub fn status_all(&self) -> BTreeMap<String, BreakerStatus> {
        self.snapshot()
            .into_iter()
            .map(|b| (b.path().to_string(), b.status()))
            .collect()
    }

    // Clone out the Arcs so breaker locks are never taken under a shard lock.
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
