//! Go/no-go decision for live execution.
//!
//! Check order (first failure wins):
//! 1. Data health must be `healthy`
//! 2. No circuit breaker may be tripped
//! 3. Budget guard must not be triggered
//!
//! An unsafe decision downgrades execution to a dry run; it never fails the
//! request.

use std::fmt;
use std::sync::Arc;

use hlgate_core::DenialKind;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::budget_guard::BudgetGuard;
use crate::circuit_breaker::CircuitBreakers;

/// Market data health reported by the feed layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataHealth {
    Healthy,
    Degraded,
    Unknown,
}

impl fmt::Display for DataHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Source of the data health signal.
pub trait DataHealthProvider: Send + Sync {
    fn status(&self) -> DataHealth;
}

/// Data health set explicitly by the owner.
#[derive(Debug)]
pub struct StaticDataHealth {
    status: RwLock<DataHealth>,
}

impl StaticDataHealth {
    #[must_use]
    pub fn new(status: DataHealth) -> Self {
        Self {
            status: RwLock::new(status),
        }
    }

    pub fn set(&self, status: DataHealth) {
        *self.status.write() = status;
    }
}

impl DataHealthProvider for StaticDataHealth {
    fn status(&self) -> DataHealth {
        *self.status.read()
    }
}

/// Why the guard decided what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveGuardReason {
    AllGreen,
    GuardDisabled,
    DataDegraded,
    BreakerActive,
    BudgetTriggered,
}

impl LiveGuardReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllGreen => "all_green",
            Self::GuardDisabled => "guard_disabled",
            Self::DataDegraded => "data_degraded",
            Self::BreakerActive => "breaker_active",
            Self::BudgetTriggered => "budget_triggered",
        }
    }

    /// Denial classification for unsafe reasons.
    #[must_use]
    pub fn denial_kind(&self) -> Option<DenialKind> {
        match self {
            Self::AllGreen | Self::GuardDisabled => None,
            Self::DataDegraded => Some(DenialKind::DataDegraded),
            Self::BreakerActive => Some(DenialKind::BreakerOpen),
            Self::BudgetTriggered => Some(DenialKind::BudgetExceeded),
        }
    }
}

impl fmt::Display for LiveGuardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveGuardDecision {
    pub safe: bool,
    pub reason: LiveGuardReason,
    pub details: Map<String, Value>,
}

impl LiveGuardDecision {
    fn new(safe: bool, reason: LiveGuardReason, details: Value) -> Self {
        let details = match details {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            safe,
            reason,
            details,
        }
    }
}

/// Aggregates data health, breakers and budget into one decision.
pub struct LiveGuard {
    enabled: bool,
    data_health: Arc<dyn DataHealthProvider>,
    breakers: Arc<CircuitBreakers>,
    budget: Arc<BudgetGuard>,
}

impl LiveGuard {
    #[must_use]
    pub fn new(
        enabled: bool,
        data_health: Arc<dyn DataHealthProvider>,
        breakers: Arc<CircuitBreakers>,
        budget: Arc<BudgetGuard>,
    ) -> Self {
        Self {
            enabled,
            data_health,
            breakers,
            budget,
        }
    }

    /// Evaluate the guard. Reads only; records nothing.
    #[must_use]
    pub fn check(&self) -> LiveGuardDecision {
        if !self.enabled {
            return LiveGuardDecision::new(true, LiveGuardReason::GuardDisabled, json!({}));
        }

        let health = self.data_health.status();
        if health != DataHealth::Healthy {
            return LiveGuardDecision::new(
                false,
                LiveGuardReason::DataDegraded,
                json!({ "data_health": health.to_string() }),
            );
        }

        let tripped = self.breakers.tripped_paths();
        if !tripped.is_empty() {
            return LiveGuardDecision::new(
                false,
                LiveGuardReason::BreakerActive,
                json!({ "active_breakers": tripped }),
            );
        }

        let budget = self.budget.status();
        if budget.triggered {
            return LiveGuardDecision::new(
                false,
                LiveGuardReason::BudgetTriggered,
                json!({
                    "drawdown_pct": budget.drawdown_pct.to_string(),
                    "max_drawdown_pct": budget.max_drawdown_pct.to_string(),
                }),
            );
        }

        LiveGuardDecision::new(
            true,
            LiveGuardReason::AllGreen,
            json!({
                "data_health": health.to_string(),
                "drawdown_pct": budget.drawdown_pct.to_string(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget_guard::BudgetConfig;
    use crate::circuit_breaker::{BreakerConfig, ORDER_API};
    use rust_decimal_macros::dec;

    struct Fixture {
        health: Arc<StaticDataHealth>,
        breakers: Arc<CircuitBreakers>,
        budget: Arc<BudgetGuard>,
        guard: LiveGuard,
    }

    fn fixture(enabled: bool) -> Fixture {
        let health = Arc::new(StaticDataHealth::new(DataHealth::Healthy));
        let breakers = Arc::new(CircuitBreakers::new(
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            Default::default(),
        ));
        let budget = Arc::new(BudgetGuard::new(BudgetConfig::default()).unwrap());
        let guard = LiveGuard::new(
            enabled,
            health.clone(),
            Arc::clone(&breakers),
            Arc::clone(&budget),
        );
        Fixture {
            health,
            breakers,
            budget,
            guard,
        }
    }

    #[test]
    fn test_all_green() {
        let f = fixture(true);
        let decision = f.guard.check();
        assert!(decision.safe);
        assert_eq!(decision.reason, LiveGuardReason::AllGreen);
        assert_eq!(decision.details["data_health"], "healthy");
    }

    #[test]
    fn test_data_degraded_first() {
        let f = fixture(true);
        f.health.set(DataHealth::Unknown);
        f.breakers.record_failure(ORDER_API);
        f.budget.record_pnl(dec!(-5000), dec!(0));

        let decision = f.guard.check();
        assert!(!decision.safe);
        assert_eq!(decision.reason, LiveGuardReason::DataDegraded);
        assert_eq!(decision.details["data_health"], "unknown");
    }

    #[test]
    fn test_breaker_before_budget() {
        let f = fixture(true);
        f.breakers.record_failure(ORDER_API);
        f.budget.record_pnl(dec!(-5000), dec!(0));

        let decision = f.guard.check();
        assert!(!decision.safe);
        assert_eq!(decision.reason, LiveGuardReason::BreakerActive);
        assert_eq!(decision.details["active_breakers"], json!([ORDER_API]));
        assert_eq!(
            decision.reason.denial_kind(),
            Some(DenialKind::BreakerOpen)
        );
    }

    #[test]
    fn test_budget_triggered() {
        let f = fixture(true);
        f.budget.record_pnl(dec!(-2000), dec!(0));

        let decision = f.guard.check();
        assert!(!decision.safe);
        assert_eq!(decision.reason, LiveGuardReason::BudgetTriggered);
        assert_eq!(decision.details["drawdown_pct"], "20");
    }

    #[test]
    fn test_recovers_after_success() {
        let f = fixture(true);
        f.breakers.record_failure(ORDER_API);
        assert!(!f.guard.check().safe);
        f.breakers.record_success(ORDER_API);
        assert!(f.guard.check().safe);
    }

    #[test]
    fn test_disabled_guard_is_always_safe() {
        let f = fixture(false);
        f.health.set(DataHealth::Degraded);
        let decision = f.guard.check();
        assert!(decision.safe);
        assert_eq!(decision.reason, LiveGuardReason::GuardDisabled);
    }
}
