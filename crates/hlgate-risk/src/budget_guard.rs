//! Rolling-window drawdown guard.
//!
//! Every PnL record re-evaluates the trigger from the window sum:
//! `drawdown_pct = |sum(total)| / initial_balance * 100`. The trigger has no
//! timer of its own; it clears only when a later write (or window expiry
//! observed by a later write) brings the sum back under the threshold.

use std::collections::VecDeque;

use hlgate_core::now_ms;
use hlgate_telemetry::Metrics;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{RiskError, RiskResult};

/// Budget guard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Drawdown (percent of initial balance) that triggers the guard.
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: Decimal,
    /// Rolling window length.
    #[serde(default = "default_window_hours")]
    pub window_hours: u64,
    /// Reference balance for the percentage.
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
}

fn default_max_drawdown_pct() -> Decimal {
    Decimal::from(10)
}

fn default_window_hours() -> u64 {
    24
}

fn default_initial_balance() -> Decimal {
    Decimal::from(10_000)
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: default_max_drawdown_pct(),
            window_hours: default_window_hours(),
            initial_balance: default_initial_balance(),
        }
    }
}

/// Snapshot of the guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub triggered: bool,
    pub drawdown_pct: Decimal,
    pub total_pnl: Decimal,
    pub initial_balance: Decimal,
    pub max_drawdown_pct: Decimal,
    pub triggered_at_ms: Option<u64>,
    pub records_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct PnlRecord {
    timestamp_ms: u64,
    realized: Decimal,
    simulated: Decimal,
}

impl PnlRecord {
    fn total(&self) -> Decimal {
        self.realized + self.simulated
    }
}

#[derive(Debug)]
struct BudgetState {
    records: VecDeque<PnlRecord>,
    initial_balance: Decimal,
    total_pnl: Decimal,
    drawdown_pct: Decimal,
    triggered_at_ms: Option<u64>,
}

/// Halts live trading when rolling PnL moves too far from the initial balance.
#[derive(Debug)]
pub struct BudgetGuard {
    max_drawdown_pct: Decimal,
    window_ms: u64,
    state: Mutex<BudgetState>,
}

impl BudgetGuard {
    /// Create a guard. Fails on a non-positive initial balance.
    pub fn new(config: BudgetConfig) -> RiskResult<Self> {
        validate_balance(config.initial_balance)?;
        Ok(Self {
            max_drawdown_pct: config.max_drawdown_pct,
            window_ms: config.window_hours * 3_600_000,
            state: Mutex::new(BudgetState {
                records: VecDeque::new(),
                initial_balance: config.initial_balance,
                total_pnl: Decimal::ZERO,
                drawdown_pct: Decimal::ZERO,
                triggered_at_ms: None,
            }),
        })
    }

    /// Record a PnL delta. Returns the trigger state after the write.
    pub fn record_pnl(&self, realized: Decimal, simulated: Decimal) -> bool {
        self.record_pnl_at(realized, simulated, now_ms())
    }

    /// Record a PnL delta at a given time (for testing).
    pub fn record_pnl_at(&self, realized: Decimal, simulated: Decimal, now_ms: u64) -> bool {
        let mut state = self.state.lock();
        state.records.push_back(PnlRecord {
            timestamp_ms: now_ms,
            realized,
            simulated,
        });
        self.evaluate(&mut state, now_ms)
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.state.lock().triggered_at_ms.is_some()
    }

    #[must_use]
    pub fn status(&self) -> BudgetStatus {
        let state = self.state.lock();
        BudgetStatus {
            triggered: state.triggered_at_ms.is_some(),
            drawdown_pct: state.drawdown_pct,
            total_pnl: state.total_pnl,
            initial_balance: state.initial_balance,
            max_drawdown_pct: self.max_drawdown_pct,
            triggered_at_ms: state.triggered_at_ms,
            records_count: state.records.len(),
        }
    }

    /// Change the reference balance and re-evaluate the trigger.
    pub fn set_initial_balance(&self, amount: Decimal) -> RiskResult<()> {
        self.set_initial_balance_at(amount, now_ms())
    }

    /// Change the reference balance at a given time (for testing).
    pub fn set_initial_balance_at(&self, amount: Decimal, now_ms: u64) -> RiskResult<()> {
        validate_balance(amount)?;
        let mut state = self.state.lock();
        state.initial_balance = amount;
        self.evaluate(&mut state, now_ms);
        info!(initial_balance = %amount, "Budget guard initial balance updated");
        Ok(())
    }

    /// Drop every record and clear the trigger.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.records.clear();
        state.total_pnl = Decimal::ZERO;
        state.drawdown_pct = Decimal::ZERO;
        state.triggered_at_ms = None;
        Metrics::budget_drawdown(0.0);
        Metrics::budget_triggered(false);
        info!("Budget guard manually reset");
    }

    fn evaluate(&self, state: &mut BudgetState, now_ms: u64) -> bool {
        while state
            .records
            .front()
            .is_some_and(|r| now_ms.saturating_sub(r.timestamp_ms) > self.window_ms)
        {
            state.records.pop_front();
        }

        state.total_pnl = state.records.iter().map(PnlRecord::total).sum();
        state.drawdown_pct = (state.total_pnl.abs() / state.initial_balance
            * Decimal::ONE_HUNDRED)
            .normalize();
        Metrics::budget_drawdown(state.drawdown_pct.to_f64().unwrap_or(0.0));

        let breached = state.drawdown_pct >= self.max_drawdown_pct;
        match (breached, state.triggered_at_ms) {
            (true, None) => {
                state.triggered_at_ms = Some(now_ms);
                error!(
                    drawdown_pct = %state.drawdown_pct,
                    max_drawdown_pct = %self.max_drawdown_pct,
                    total_pnl = %state.total_pnl,
                    "BUDGET GUARD TRIGGERED"
                );
                Metrics::budget_triggered(true);
            }
            (false, Some(_)) => {
                state.triggered_at_ms = None;
                info!(
                    drawdown_pct = %state.drawdown_pct,
                    "Budget guard reset, drawdown back under threshold"
                );
                Metrics::budget_triggered(false);
            }
            _ => {}
        }
        breached
    }
}

fn validate_balance(amount: Decimal) -> RiskResult<()> {
    if amount <= Decimal::ZERO {
        return Err(RiskError::ConfigError(format!(
            "initial balance must be positive, got {amount}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const T0: u64 = 1_700_000_000_000;
    const HOUR_MS: u64 = 3_600_000;

    fn guard() -> BudgetGuard {
        BudgetGuard::new(BudgetConfig::default()).unwrap()
    }

    #[test]
    fn test_triggers_in_same_call() {
        let g = guard();
        assert!(!g.record_pnl_at(dec!(-500), dec!(0), T0));
        assert!(!g.is_triggered());
        // -1000 on 10000 = 10%
        assert!(g.record_pnl_at(dec!(-300), dec!(-200), T0 + 1));
        assert!(g.is_triggered());
        assert_eq!(g.status().triggered_at_ms, Some(T0 + 1));
    }

    #[test]
    fn test_offsetting_delta_resets() {
        let g = guard();
        g.record_pnl_at(dec!(-1200), dec!(0), T0);
        assert!(g.is_triggered());
        assert!(!g.record_pnl_at(dec!(400), dec!(0), T0 + 1));
        assert!(!g.is_triggered());
        assert_eq!(g.status().total_pnl, dec!(-800));
    }

    #[test]
    fn test_absolute_sum_counts_gains() {
        let g = guard();
        assert!(g.record_pnl_at(dec!(1000), dec!(0), T0));
    }

    #[test]
    fn test_window_expiry_observed_on_next_write() {
        let g = guard();
        g.record_pnl_at(dec!(-1500), dec!(0), T0);
        assert!(g.is_triggered());
        // No timer: still triggered until a write re-evaluates
        assert!(g.is_triggered());
        assert!(!g.record_pnl_at(dec!(-10), dec!(0), T0 + 25 * HOUR_MS));
        let status = g.status();
        assert_eq!(status.records_count, 1);
        assert_eq!(status.total_pnl, dec!(-10));
    }

    #[test]
    fn test_status_fields() {
        let g = guard();
        g.record_pnl_at(dec!(-100), dec!(-50), T0);
        let status = g.status();
        assert!(!status.triggered);
        assert_eq!(status.drawdown_pct, dec!(1.5));
        assert_eq!(status.total_pnl, dec!(-150));
        assert_eq!(status.initial_balance, dec!(10000));
        assert_eq!(status.max_drawdown_pct, dec!(10));
        assert_eq!(status.records_count, 1);
    }

    #[test]
    fn test_set_initial_balance_reevaluates() {
        let g = guard();
        g.record_pnl_at(dec!(-600), dec!(0), T0);
        assert!(!g.is_triggered());
        g.set_initial_balance_at(dec!(5000), T0 + 1).unwrap();
        assert!(g.is_triggered());
    }

    #[test]
    fn test_rejects_non_positive_balance() {
        let g = guard();
        assert!(matches!(
            g.set_initial_balance(dec!(0)),
            Err(RiskError::ConfigError(_))
        ));
        let config = BudgetConfig {
            initial_balance: dec!(-1),
            ..Default::default()
        };
        assert!(BudgetGuard::new(config).is_err());
    }

    #[test]
    fn test_reset_clears_everything() {
        let g = guard();
        g.record_pnl_at(dec!(-5000), dec!(0), T0);
        g.reset();
        let status = g.status();
        assert!(!status.triggered);
        assert_eq!(status.records_count, 0);
        assert_eq!(status.drawdown_pct, Decimal::ZERO);
    }

    #[test]
    fn test_config_from_toml() {
        let config: BudgetConfig =
            toml::from_str("max_drawdown_pct = 5.5\nwindow_hours = 12").unwrap();
        assert_eq!(config.max_drawdown_pct, dec!(5.5));
        assert_eq!(config.window_hours, 12);
        assert_eq!(config.initial_balance, dec!(10000));
    }
}
