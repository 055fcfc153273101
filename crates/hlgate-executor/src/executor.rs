//! Execution step for admitted orders.
//!
//! # Flow
//!
//! 1. Load the pending order from the bus
//! 2. Trading disabled        → dry run (TradingDisabled)
//! 3. LiveGuard unsafe        → dry run (guard reason)
//! 4. Send via SubmissionClient
//! 5. Feed the breaker (live sends only) and move the order to
//!    submitted / rejected / failed
//!
//! A downgrade never fails the call; it is audited as
//! `execution_downgraded` and the order proceeds as a simulation.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use hlgate_core::{AuditEvent, AuditEventKind, OrderId, OrderStatus};
use hlgate_risk::{BudgetGuard, CircuitBreakers, LiveGuard, LiveGuardReason, ORDER_API};
use hlgate_telemetry::Metrics;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::order_bus::OrderBus;
use crate::submission::{ErrorType, OrderPayload, SendResult, SubmissionClient};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Live trading switch. When false every order is a dry run.
    #[serde(default)]
    pub trading_enabled: bool,
    /// Breaker path fed by order sends.
    #[serde(default = "default_breaker_path")]
    pub breaker_path: String,
}

fn default_breaker_path() -> String {
    ORDER_API.to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            trading_enabled: false,
            breaker_path: default_breaker_path(),
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Why an order was executed as a dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DowngradeReason {
    TradingDisabled,
    Guard(LiveGuardReason),
}

impl DowngradeReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TradingDisabled => "trading_disabled",
            Self::Guard(reason) => reason.as_str(),
        }
    }
}

impl fmt::Display for DowngradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `OrderExecutor::execute`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub order_id: OrderId,
    pub dry_run: bool,
    pub downgrade: Option<DowngradeReason>,
    /// Status the order was moved to.
    pub status: OrderStatus,
    pub send_result: SendResult,
}

// ============================================================================
// OrderExecutor
// ============================================================================

/// Sends admitted orders, gated by the live guard.
pub struct OrderExecutor {
    config: ExecutorConfig,
    bus: Arc<OrderBus>,
    guard: Arc<LiveGuard>,
    breakers: Arc<CircuitBreakers>,
    budget: Arc<BudgetGuard>,
    client: Arc<SubmissionClient>,
    in_flight: Mutex<HashSet<OrderId>>,
}

impl OrderExecutor {
    #[must_use]
    pub fn new(
        config: ExecutorConfig,
        bus: Arc<OrderBus>,
        guard: Arc<LiveGuard>,
        breakers: Arc<CircuitBreakers>,
        budget: Arc<BudgetGuard>,
        client: Arc<SubmissionClient>,
    ) -> Self {
        Self {
            config,
            bus,
            guard,
            breakers,
            budget,
            client,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute one pending order.
    ///
    /// Fails for unknown orders and for orders that are not pending or are
    /// already being executed.
    pub async fn execute(&self, order_id: &OrderId) -> ExecutorResult<ExecutionOutcome> {
        // Claim first, then read: a claim taken after another execution
        // finished sees that execution's status.
        let claimed = self.in_flight.lock().insert(order_id.clone());
        let _claim = claimed.then(|| InFlightClaim {
            in_flight: &self.in_flight,
            order_id,
        });

        let order = self
            .bus
            .order(order_id)
            .ok_or_else(|| ExecutorError::UnknownOrder(order_id.to_string()))?;
        if !claimed || order.status != OrderStatus::Pending {
            return Err(ExecutorError::NotPending {
                order_id: order_id.to_string(),
                status: order.status,
            });
        }

        let payload = OrderPayload::from_order(order_id, &order.intent);
        self.execute_pending(order_id, payload).await
    }

    async fn execute_pending(
        &self,
        order_id: &OrderId,
        payload: OrderPayload,
    ) -> ExecutorResult<ExecutionOutcome> {
        let downgrade = self.downgrade_reason(order_id)?;
        let dry_run = downgrade.is_some();

        let send_result = self.client.send_order(&payload, dry_run).await;
        if !dry_run {
            self.feed_breaker(&send_result);
        }

        let status = match send_result.error_type {
            None => OrderStatus::Submitted,
            Some(ErrorType::Auth | ErrorType::Invalid) => OrderStatus::Rejected,
            Some(_) => OrderStatus::Failed,
        };
        self.bus
            .update_status(order_id, status, status_details(&send_result, dry_run))?;

        info!(
            order_id = %order_id,
            status = %status,
            dry_run,
            attempts = send_result.attempts,
            "Order executed"
        );
        Ok(ExecutionOutcome {
            order_id: order_id.clone(),
            dry_run,
            downgrade,
            status,
            send_result,
        })
    }

    /// Decide whether this execution must be simulated, auditing the
    /// downgrade when it is.
    fn downgrade_reason(&self, order_id: &OrderId) -> ExecutorResult<Option<DowngradeReason>> {
        let (reason, details) = if !self.config.trading_enabled {
            (DowngradeReason::TradingDisabled, serde_json::Map::new())
        } else {
            let decision = self.guard.check();
            if decision.safe {
                debug!(order_id = %order_id, reason = %decision.reason, "Live guard clear");
                return Ok(None);
            }
            warn!(
                order_id = %order_id,
                reason = %decision.reason,
                details = ?decision.details,
                "Live guard unsafe, downgrading to dry run"
            );
            (DowngradeReason::Guard(decision.reason), decision.details)
        };

        Metrics::live_guard_downgrade(reason.as_str());
        let classification = match reason {
            DowngradeReason::Guard(r) => r.denial_kind(),
            DowngradeReason::TradingDisabled => None,
        };
        let event = AuditEvent::new(
            AuditEventKind::ExecutionDowngraded,
            json!({
                "order_id": order_id,
                "reason": reason.as_str(),
                "classification": classification,
                "details": details,
            }),
            hlgate_core::now_ms(),
        )
        .with_order(order_id.clone());
        self.bus.audit(event)?;
        Ok(Some(reason))
    }

    fn feed_breaker(&self, result: &SendResult) {
        let path = self.config.breaker_path.as_str();
        match result.error_type {
            None => self.breakers.record_success(path),
            Some(t) if t.is_retryable() => {
                if self.breakers.record_failure(path) {
                    warn!(path, error_type = %t, "Order path breaker tripped");
                }
            }
            // Auth and Invalid are faults in the request, not the path
            Some(_) => {}
        }
    }

    /// Record a fill and feed its PnL to the budget guard. Returns the
    /// budget trigger state after the write.
    pub fn record_fill(
        &self,
        order_id: &OrderId,
        realized: Decimal,
        simulated: Decimal,
    ) -> ExecutorResult<bool> {
        let details = BTreeMap::from([
            ("realized_pnl".to_string(), json!(realized)),
            ("simulated_pnl".to_string(), json!(simulated)),
        ]);
        self.bus.update_status(order_id, OrderStatus::Filled, details)?;
        let triggered = self.budget.record_pnl(realized, simulated);
        info!(
            order_id = %order_id,
            realized = %realized,
            simulated = %simulated,
            budget_triggered = triggered,
            "Fill recorded"
        );
        Ok(triggered)
    }
}

fn status_details(result: &SendResult, dry_run: bool) -> BTreeMap<String, Value> {
    let mut details = BTreeMap::from([
        ("dry_run".to_string(), json!(dry_run)),
        ("attempts".to_string(), json!(result.attempts)),
    ]);
    if let Some(id) = &result.order_id {
        details.insert("exchange_order_id".to_string(), json!(id));
    }
    if let Some(t) = result.error_type {
        details.insert("error_type".to_string(), json!(t));
        details.insert("classification".to_string(), json!(t.denial_kind()));
    }
    if let Some(msg) = &result.error_message {
        details.insert("error_message".to_string(), json!(msg));
    }
    details
}

/// Releases an in-flight claim when the execution ends or is dropped.
struct InFlightClaim<'a> {
    in_flight: &'a Mutex<HashSet<OrderId>>,
    order_id: &'a OrderId,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::{IdempotencyCache, IdempotencyConfig};
    use crate::order_bus::OrderBusConfig;
    use crate::rate_limiter::{BucketConfig, TokenBucket};
    use crate::submission::{ExchangeError, MockExecutionClient, RetryConfig};
    use hlgate_core::{OrderIntent, OrderSide, Size, Symbol};
    use hlgate_persistence::MemoryAuditSink;
    use hlgate_risk::{
        BreakerConfig, BudgetConfig, DataHealth, OrderValidator, Positions, RiskLimits,
        StaticDataHealth, StaticPriceProvider,
    };
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Fixture {
        executor: OrderExecutor,
        bus: Arc<OrderBus>,
        sink: Arc<MemoryAuditSink>,
        mock: Arc<MockExecutionClient>,
        health: Arc<StaticDataHealth>,
        breakers: Arc<CircuitBreakers>,
        budget: Arc<BudgetGuard>,
    }

    fn fixture(trading_enabled: bool) -> Fixture {
        let sink = Arc::new(MemoryAuditSink::new());
        let validator = OrderValidator::new(
            RiskLimits::default(),
            Arc::new(StaticPriceProvider::with_reference_prices()),
        );
        let bus = Arc::new(OrderBus::new(
            OrderBusConfig::default(),
            Arc::new(IdempotencyCache::new(IdempotencyConfig::default())),
            Arc::new(validator),
            sink.clone(),
        ));
        let health = Arc::new(StaticDataHealth::new(DataHealth::Healthy));
        let breakers = Arc::new(CircuitBreakers::new(
            BreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
            Default::default(),
        ));
        let budget = Arc::new(BudgetGuard::new(BudgetConfig::default()).unwrap());
        let guard = Arc::new(LiveGuard::new(
            true,
            health.clone(),
            Arc::clone(&breakers),
            Arc::clone(&budget),
        ));
        let mock = Arc::new(MockExecutionClient::new());
        let limiter = Arc::new(
            TokenBucket::new(
                "order",
                &BucketConfig {
                    rps: 100.0,
                    burst: 100.0,
                },
            )
            .unwrap(),
        );
        let client = Arc::new(SubmissionClient::new(
            mock.clone(),
            limiter,
            Duration::from_millis(200),
            RetryConfig {
                max_retries: 1,
                base_delay_ms: 10,
                jitter: 0.0,
                ..Default::default()
            },
        ));
        let executor = OrderExecutor::new(
            ExecutorConfig {
                trading_enabled,
                ..Default::default()
            },
            Arc::clone(&bus),
            guard,
            Arc::clone(&breakers),
            Arc::clone(&budget),
            client,
        );
        Fixture {
            executor,
            bus,
            sink,
            mock,
            health,
            breakers,
            budget,
        }
    }

    fn admit(f: &Fixture, id: &str) -> OrderId {
        let intent = OrderIntent::market(Symbol::Eth, OrderSide::Buy, Size::new(dec!(0.5)))
            .unwrap()
            .with_intent_id(id);
        f.bus.submit(&intent, &Positions::new()).order_id.unwrap()
    }

    fn http(status: u16) -> ExchangeError {
        ExchangeError::Http {
            status,
            retry_after_secs: None,
            body: "error".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trading_disabled_is_dry_run() {
        let f = fixture(false);
        let order_id = admit(&f, "a");

        let outcome = f.executor.execute(&order_id).await.unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.downgrade, Some(DowngradeReason::TradingDisabled));
        assert_eq!(outcome.status, OrderStatus::Submitted);
        assert_eq!(f.mock.call_count(), 0);

        let order = f.bus.order(&order_id).unwrap();
        assert_eq!(order.details["dry_run"], true);
        assert!(f
            .sink
            .events()
            .iter()
            .any(|e| e.kind == AuditEventKind::ExecutionDowngraded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_send_when_guard_clear() {
        let f = fixture(true);
        let order_id = admit(&f, "a");

        let outcome = f.executor.execute(&order_id).await.unwrap();
        assert!(!outcome.dry_run);
        assert!(outcome.downgrade.is_none());
        assert_eq!(outcome.status, OrderStatus::Submitted);
        assert_eq!(f.mock.call_count(), 1);
        assert_eq!(f.mock.payloads()[0].client_order_id, order_id.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_data_downgrades() {
        let f = fixture(true);
        f.health.set(DataHealth::Degraded);
        let order_id = admit(&f, "a");

        let outcome = f.executor.execute(&order_id).await.unwrap();
        assert!(outcome.dry_run);
        assert_eq!(
            outcome.downgrade,
            Some(DowngradeReason::Guard(LiveGuardReason::DataDegraded))
        );
        assert_eq!(f.mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failures_trip_breaker_then_downgrade() {
        let f = fixture(true);
        f.mock.set_default_result(Err(http(503)));

        let first = admit(&f, "a");
        let outcome = f.executor.execute(&first).await.unwrap();
        assert_eq!(outcome.status, OrderStatus::Failed);
        assert_eq!(outcome.send_result.attempts, 2);
        // One failure per execution; threshold is 2
        assert!(!f.breakers.should_skip(ORDER_API));

        let second = admit(&f, "b");
        f.executor.execute(&second).await.unwrap();
        assert!(f.breakers.should_skip(ORDER_API));

        let third = admit(&f, "c");
        let outcome = f.executor.execute(&third).await.unwrap();
        assert_eq!(
            outcome.downgrade,
            Some(DowngradeReason::Guard(LiveGuardReason::BreakerActive))
        );
        assert_eq!(f.mock.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_rejects_without_breaker() {
        let f = fixture(true);
        f.mock.set_default_result(Err(http(403)));
        let order_id = admit(&f, "a");

        let outcome = f.executor.execute(&order_id).await.unwrap();
        assert_eq!(outcome.status, OrderStatus::Rejected);
        assert_eq!(f.breakers.status(ORDER_API).failure_count, 0);
        let order = f.bus.order(&order_id).unwrap();
        assert_eq!(order.details["classification"], "auth_failure");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_twice_fails() {
        let f = fixture(false);
        let order_id = admit(&f, "a");
        f.executor.execute(&order_id).await.unwrap();

        let again = f.executor.execute(&order_id).await;
        assert!(matches!(
            again,
            Err(ExecutorError::NotPending {
                status: OrderStatus::Submitted,
                ..
            })
        ));
        assert!(matches!(
            f.executor.execute(&OrderId::from("missing")).await,
            Err(ExecutorError::UnknownOrder(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_executions_send_once() {
        for round in 0..20 {
            let f = fixture(true);
            let order_id = admit(&f, &format!("race-{round}"));
            let executor = Arc::new(f.executor);

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let executor = Arc::clone(&executor);
                    let order_id = order_id.clone();
                    tokio::spawn(async move { executor.execute(&order_id).await })
                })
                .collect();

            let mut sent = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(outcome) => {
                        assert_eq!(outcome.status, OrderStatus::Submitted);
                        sent += 1;
                    }
                    Err(err) => assert!(matches!(err, ExecutorError::NotPending { .. })),
                }
            }
            assert_eq!(sent, 1, "round {round}");
            assert_eq!(f.mock.call_count(), 1, "round {round}");
            assert!(executor.in_flight.lock().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_feeds_budget_guard() {
        let f = fixture(true);
        let order_id = admit(&f, "a");
        f.executor.execute(&order_id).await.unwrap();

        assert!(f
            .executor
            .record_fill(&order_id, dec!(-1500), dec!(0))
            .unwrap());
        assert_eq!(f.bus.order(&order_id).unwrap().status, OrderStatus::Filled);
        assert!(f.budget.is_triggered());

        let next = admit(&f, "b");
        let outcome = f.executor.execute(&next).await.unwrap();
        assert_eq!(
            outcome.downgrade,
            Some(DowngradeReason::Guard(LiveGuardReason::BudgetTriggered))
        );
    }
}
