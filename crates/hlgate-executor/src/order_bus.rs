//! Order admission.
//!
//! `OrderBus::submit` runs an intent through idempotency, validation and
//! optional risk clipping, records a `PendingOrder` and writes the audit
//! trail. Every outcome is returned as an `EnqueuedResult`; internal faults
//! are converted into an `order_error` audit event and a failed result.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hlgate_core::{
    now_ms, AuditEvent, AuditEventKind, EnqueuedResult, IntentId, OrderId, OrderIntent,
    OrderStatus, PendingOrder, ValidationResult,
};
use hlgate_persistence::AuditSink;
use hlgate_risk::{OrderValidator, Positions};
use hlgate_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::idempotency::IdempotencyCache;

/// Default page size for the read accessors.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Order bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBusConfig {
    /// Clip intents whose only violations are size bounds instead of
    /// rejecting them.
    #[serde(default)]
    pub auto_clip: bool,
    /// Terminal orders are dropped this long after their last update.
    #[serde(default = "default_terminal_retention_hours")]
    pub terminal_retention_hours: u64,
    /// Events kept in the in-memory audit tail.
    #[serde(default = "default_audit_tail_capacity")]
    pub audit_tail_capacity: usize,
}

fn default_terminal_retention_hours() -> u64 {
    6
}

fn default_audit_tail_capacity() -> usize {
    500
}

impl Default for OrderBusConfig {
    fn default() -> Self {
        Self {
            auto_clip: false,
            terminal_retention_hours: default_terminal_retention_hours(),
            audit_tail_capacity: default_audit_tail_capacity(),
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    orders: HashMap<OrderId, PendingOrder>,
    by_intent: HashMap<IntentId, OrderId>,
    /// Admission order, oldest first.
    admitted: VecDeque<OrderId>,
    /// `(updated_at_ms, order_id)` per terminal transition, oldest first.
    terminal: VecDeque<(u64, OrderId)>,
    tail: VecDeque<AuditEvent>,
}

impl BusState {
    fn insert(&mut self, order: PendingOrder) {
        self.by_intent
            .insert(order.intent.intent_id.clone(), order.order_id.clone());
        self.admitted.push_back(order.order_id.clone());
        self.orders.insert(order.order_id.clone(), order);
    }

    fn remove(&mut self, order_id: &OrderId) {
        if let Some(order) = self.orders.remove(order_id) {
            self.by_intent.remove(&order.intent.intent_id);
        }
        self.admitted.retain(|id| id != order_id);
    }

    /// Drop terminal orders not updated within `retention_ms`.
    ///
    /// Only the aged front of the terminal queue is visited. Entries whose
    /// order has since been updated again are stale and skipped.
    fn evict_terminal(&mut self, now_ms: u64, retention_ms: u64) -> usize {
        let mut evicted = 0;
        while let Some((stamp, _)) = self.terminal.front() {
            if now_ms.saturating_sub(*stamp) < retention_ms {
                break;
            }
            let Some((stamp, id)) = self.terminal.pop_front() else {
                break;
            };
            let current = self
                .orders
                .get(&id)
                .is_some_and(|o| o.status.is_terminal() && o.updated_at_ms == stamp);
            if current {
                if let Some(order) = self.orders.remove(&id) {
                    self.by_intent.remove(&order.intent.intent_id);
                }
                evicted += 1;
            }
        }
        if evicted > 0 {
            let orders = &self.orders;
            self.admitted.retain(|id| orders.contains_key(id));
        }
        evicted
    }
}

/// Admission orchestrator.
pub struct OrderBus {
    config: OrderBusConfig,
    idempotency: Arc<IdempotencyCache>,
    validator: Arc<OrderValidator>,
    sink: Arc<dyn AuditSink>,
    state: Mutex<BusState>,
    seq: AtomicU64,
}

impl OrderBus {
    #[must_use]
    pub fn new(
        config: OrderBusConfig,
        idempotency: Arc<IdempotencyCache>,
        validator: Arc<OrderValidator>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            idempotency,
            validator,
            sink,
            state: Mutex::new(BusState::default()),
            seq: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrderBusConfig {
        &self.config
    }

    /// Admit an intent against the caller's current positions.
    pub fn submit(&self, intent: &OrderIntent, positions: &Positions) -> EnqueuedResult {
        self.submit_at(intent, positions, now_ms())
    }

    /// `submit` at a given time (for testing).
    pub fn submit_at(
        &self,
        intent: &OrderIntent,
        positions: &Positions,
        now_ms: u64,
    ) -> EnqueuedResult {
        let intent_id = intent.intent_id.clone();

        let payload = match serde_json::to_value(intent) {
            Ok(payload) => payload,
            Err(e) => return self.fail(&intent_id, e.into(), now_ms),
        };
        if self
            .idempotency
            .check_and_store_at(intent_id.as_str(), payload, now_ms)
        {
            info!(intent_id = %intent_id, "Duplicate intent, ignored");
            Metrics::order_outcome("duplicate");
            return EnqueuedResult::duplicate(intent_id);
        }

        match self.admit(intent, positions, now_ms) {
            Ok(result) => result,
            Err(e) => self.fail(&intent_id, e, now_ms),
        }
    }

    fn admit(
        &self,
        intent: &OrderIntent,
        positions: &Positions,
        now_ms: u64,
    ) -> ExecutorResult<EnqueuedResult> {
        let intent_id = intent.intent_id.clone();
        let validation = self.validator.validate(intent, positions);

        let (admitted, validation, clipped) = if validation.valid {
            (intent.clone(), validation, false)
        } else {
            match self.try_clip(intent, positions, &validation) {
                Some((clipped_intent, revalidated)) => (clipped_intent, revalidated, true),
                None => return self.reject(intent, validation, now_ms),
            }
        };

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let order_id = OrderId::derive(&intent_id, now_ms, seq);

        let event = AuditEvent::new(
            AuditEventKind::OrderSubmitted,
            json!({
                "order_id": order_id,
                "intent_id": intent_id,
                "symbol": admitted.symbol,
                "side": admitted.side,
                "size": admitted.size,
                "type": admitted.kind,
                "warnings": validation.warnings,
            }),
            now_ms,
        )
        .with_order(order_id.clone())
        .with_intent(intent_id.clone());

        {
            let mut state = self.state.lock();
            let evicted = state.evict_terminal(now_ms, self.retention_ms());
            if evicted > 0 {
                debug!(evicted, "Evicted terminal orders past retention");
            }
            state.insert(PendingOrder::new(order_id.clone(), admitted.clone(), now_ms));
            if let Err(e) = self.write_audit(&mut state, event) {
                state.remove(&order_id);
                return Err(e);
            }
        }

        Metrics::order_outcome(if clipped { "clipped" } else { "accepted" });
        info!(
            order_id = %order_id,
            intent_id = %intent_id,
            symbol = %admitted.symbol,
            side = ?admitted.side,
            size = %admitted.size,
            clipped,
            "Order admitted"
        );
        Ok(EnqueuedResult::accepted(intent_id, order_id, validation, clipped))
    }

    /// Clip an intent whose only violations are size bounds. Returns the
    /// clipped copy and its passing validation.
    fn try_clip(
        &self,
        intent: &OrderIntent,
        positions: &Positions,
        validation: &ValidationResult,
    ) -> Option<(OrderIntent, ValidationResult)> {
        if !self.config.auto_clip || !validation.is_clippable() {
            return None;
        }
        let clipped = self.validator.clip_to_risk(intent, positions);
        let mut revalidated = self.validator.validate(&clipped, positions);
        if !revalidated.valid {
            debug!(
                intent_id = %intent.intent_id,
                errors = %revalidated.error_summary(),
                "Clipped intent still invalid"
            );
            return None;
        }
        warn!(
            intent_id = %intent.intent_id,
            original_size = %intent.size,
            clipped_size = %clipped.size,
            "Order size clipped to risk limits"
        );
        revalidated.warnings.push(format!(
            "size clipped from {} to {}: {}",
            intent.size,
            clipped.size,
            validation.error_summary()
        ));
        revalidated.clipped_size = Some(clipped.size);
        revalidated.risk_adjusted = true;
        Some((clipped, revalidated))
    }

    fn reject(
        &self,
        intent: &OrderIntent,
        validation: ValidationResult,
        now_ms: u64,
    ) -> ExecutorResult<EnqueuedResult> {
        let event = AuditEvent::new(
            AuditEventKind::OrderRejected,
            json!({
                "intent_id": intent.intent_id,
                "symbol": intent.symbol,
                "side": intent.side,
                "size": intent.size,
                "errors": validation.errors,
                "warnings": validation.warnings,
                "clipped_size": validation.clipped_size,
            }),
            now_ms,
        )
        .with_intent(intent.intent_id.clone());
        self.write_audit(&mut self.state.lock(), event)?;

        Metrics::order_outcome("rejected");
        info!(
            intent_id = %intent.intent_id,
            errors = %validation.error_summary(),
            "Order rejected by validation"
        );
        Ok(EnqueuedResult::rejected(intent.intent_id.clone(), validation))
    }

    fn fail(&self, intent_id: &IntentId, err: ExecutorError, now_ms: u64) -> EnqueuedResult {
        error!(intent_id = %intent_id, error = %err, "Order submission failed");
        let event = AuditEvent::new(
            AuditEventKind::OrderError,
            json!({ "intent_id": intent_id, "error": err.to_string() }),
            now_ms,
        )
        .with_intent(intent_id.clone());
        if let Err(audit_err) = self.write_audit(&mut self.state.lock(), event) {
            error!(intent_id = %intent_id, error = %audit_err, "Failed to audit order error");
        }
        Metrics::order_outcome("error");
        EnqueuedResult::failed(intent_id.clone(), err.to_string())
    }

    /// Move an order to `status`, merging `details` into its metadata.
    ///
    /// Transitions are not checked for legality.
    pub fn update_status(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        details: BTreeMap<String, Value>,
    ) -> ExecutorResult<()> {
        self.update_status_at(order_id, status, details, now_ms())
    }

    /// `update_status` at a given time (for testing).
    pub fn update_status_at(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
        details: BTreeMap<String, Value>,
        now_ms: u64,
    ) -> ExecutorResult<()> {
        let mut state = self.state.lock();
        let Some(order) = state.orders.get(order_id) else {
            warn!(order_id = %order_id, status = %status, "Status update for unknown order");
            return Err(ExecutorError::UnknownOrder(order_id.to_string()));
        };

        let previous = order.status;
        let event = AuditEvent::new(
            AuditEventKind::OrderStatusUpdate,
            json!({
                "order_id": order_id,
                "previous": previous,
                "status": status,
                "details": details,
            }),
            now_ms,
        )
        .with_order(order_id.clone())
        .with_intent(order.intent.intent_id.clone());
        // the order only moves once its audit record is durable
        self.write_audit(&mut state, event)?;

        if let Some(order) = state.orders.get_mut(order_id) {
            order.status = status;
            order.updated_at_ms = now_ms;
            order.details.extend(details);
        }
        if status.is_terminal() {
            state.terminal.push_back((now_ms, order_id.clone()));
        }

        debug!(order_id = %order_id, from = %previous, to = %status, "Order status updated");
        state.evict_terminal(now_ms, self.retention_ms());
        Ok(())
    }

    /// Write an event to the sink and the in-memory tail.
    pub fn audit(&self, event: AuditEvent) -> ExecutorResult<()> {
        self.write_audit(&mut self.state.lock(), event)
    }

    fn write_audit(&self, state: &mut BusState, event: AuditEvent) -> ExecutorResult<()> {
        self.sink.append(&event)?;
        state.tail.push_back(event);
        while state.tail.len() > self.config.audit_tail_capacity {
            state.tail.pop_front();
        }
        Ok(())
    }

    fn retention_ms(&self) -> u64 {
        self.config.terminal_retention_hours * 3_600_000
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    /// Tracked orders, most recently admitted first.
    #[must_use]
    pub fn pending_orders(&self, limit: usize) -> Vec<PendingOrder> {
        let state = self.state.lock();
        state
            .admitted
            .iter()
            .rev()
            .filter_map(|id| state.orders.get(id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Recent audit events, newest first.
    #[must_use]
    pub fn audit_tail(&self, limit: usize) -> Vec<AuditEvent> {
        self.state
            .lock()
            .tail
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn order(&self, order_id: &OrderId) -> Option<PendingOrder> {
        self.state.lock().orders.get(order_id).cloned()
    }

    #[must_use]
    pub fn order_by_intent(&self, intent_id: &IntentId) -> Option<PendingOrder> {
        let state = self.state.lock();
        let order_id = state.by_intent.get(intent_id)?;
        state.orders.get(order_id).cloned()
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }
}
