//! Admission and lifecycle types shared by the validator, bus and executor.
//!
//! This module provides types for:
//! - Validation outcomes and their violation kinds
//! - Enqueue results returned to callers of the order bus
//! - Pending order lifecycle tracking
//! - Audit events and the denial taxonomy

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::{IntentId, OrderId, OrderIntent};
use crate::Size;

// ============================================================================
// Validation
// ============================================================================

/// Rule that an intent violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    NonPositiveSize,
    BelowMinSize,
    AboveMaxSize,
    NotionalCap,
    PositionLimit,
    ReduceOnlyIncrease,
    LeverageCap,
    UnsupportedTif,
    MissingLimitPrice,
    UnexpectedLimitPrice,
    NonPositiveLimitPrice,
    PriceUnavailable,
}

impl ViolationKind {
    /// Violations that a smaller size can cure.
    #[must_use]
    pub fn is_size_bound(&self) -> bool {
        matches!(
            self,
            Self::AboveMaxSize | Self::NotionalCap | Self::PositionLimit
        )
    }
}

/// Outcome of validating one intent. Produced fresh per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// Error messages in rule order. Non-empty iff `valid` is false.
    pub errors: Vec<String>,
    /// Advisory messages; never block admission.
    pub warnings: Vec<String>,
    /// Violation kinds, parallel to `errors`.
    pub violations: Vec<ViolationKind>,
    /// Tightest violated size bound, when one applies.
    pub clipped_size: Option<Size>,
    pub risk_adjusted: bool,
}

impl ValidationResult {
    #[must_use]
    pub fn new(
        errors: Vec<(ViolationKind, String)>,
        warnings: Vec<String>,
        clipped_size: Option<Size>,
    ) -> Self {
        let (violations, errors): (Vec<_>, Vec<_>) = errors.into_iter().unzip();
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
            violations,
            risk_adjusted: clipped_size.is_some(),
            clipped_size,
        }
    }

    /// A passing result with no warnings.
    #[must_use]
    pub fn passed() -> Self {
        Self::new(Vec::new(), Vec::new(), None)
    }

    /// True if every violation is a size bound and a clip size exists.
    #[must_use]
    pub fn is_clippable(&self) -> bool {
        !self.valid
            && self.clipped_size.is_some()
            && self.violations.iter().all(ViolationKind::is_size_bound)
    }

    /// Errors joined for a single-line message.
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.errors.join("; ")
    }
}

// ============================================================================
// Denial taxonomy
// ============================================================================

/// Machine-readable classification attached to every non-success outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// Repeat of an already admitted intent. A no-op signal, not a failure.
    DuplicateIntent,
    ValidationFailed,
    /// Admitted at a reduced size.
    RiskClipped,
    BreakerOpen,
    BudgetExceeded,
    DataDegraded,
    RateLimited,
    AuthFailure,
    InvalidRequest,
    NetworkFailure,
    UnknownFailure,
    /// Unexpected fault inside the core.
    InternalError,
}

impl DenialKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateIntent => "duplicate_intent",
            Self::ValidationFailed => "validation_failed",
            Self::RiskClipped => "risk_clipped",
            Self::BreakerOpen => "breaker_open",
            Self::BudgetExceeded => "budget_exceeded",
            Self::DataDegraded => "data_degraded",
            Self::RateLimited => "rate_limited",
            Self::AuthFailure => "auth_failure",
            Self::InvalidRequest => "invalid_request",
            Self::NetworkFailure => "network_failure",
            Self::UnknownFailure => "unknown_failure",
            Self::InternalError => "internal_error",
        }
    }

    /// Caller may retry later with the same intent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::NetworkFailure | Self::UnknownFailure
        )
    }

    /// Caller should fall back to simulated execution.
    #[must_use]
    pub fn falls_back_to_simulation(&self) -> bool {
        matches!(
            self,
            Self::BreakerOpen | Self::BudgetExceeded | Self::DataDegraded
        )
    }
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Enqueue result
// ============================================================================

/// Result of `OrderBus::submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueuedResult {
    pub success: bool,
    pub intent_id: IntentId,
    pub order_id: Option<OrderId>,
    /// True when this call was a duplicate of an earlier submission.
    pub idempotent: bool,
    pub validation: Option<ValidationResult>,
    pub error: Option<String>,
    pub classification: Option<DenialKind>,
    pub timestamp: DateTime<Utc>,
}

impl EnqueuedResult {
    #[must_use]
    pub fn accepted(
        intent_id: IntentId,
        order_id: OrderId,
        validation: ValidationResult,
        clipped: bool,
    ) -> Self {
        Self {
            success: true,
            intent_id,
            order_id: Some(order_id),
            idempotent: false,
            validation: Some(validation),
            error: None,
            classification: clipped.then_some(DenialKind::RiskClipped),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn duplicate(intent_id: IntentId) -> Self {
        Self {
            success: false,
            intent_id,
            order_id: None,
            idempotent: true,
            validation: None,
            error: Some("Order intent already processed".to_string()),
            classification: Some(DenialKind::DuplicateIntent),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn rejected(intent_id: IntentId, validation: ValidationResult) -> Self {
        Self {
            success: false,
            intent_id,
            order_id: None,
            idempotent: false,
            error: Some(validation.error_summary()),
            validation: Some(validation),
            classification: Some(DenialKind::ValidationFailed),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn failed(intent_id: IntentId, error: String) -> Self {
        Self {
            success: false,
            intent_id,
            order_id: None,
            idempotent: false,
            validation: None,
            error: Some(error),
            classification: Some(DenialKind::InternalError),
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Pending orders
// ============================================================================

/// Lifecycle status of an admitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    Rejected,
    Failed,
    Cancelled,
}

impl OrderStatus {
    /// Returns true if no further transition is expected.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Rejected | Self::Failed | Self::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Filled => "filled",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// An order admitted by the bus and tracked until it is evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order_id: OrderId,
    /// Snapshot of the intent as admitted (after any clip).
    pub intent: OrderIntent,
    pub status: OrderStatus,
    /// Metadata merged from status updates.
    pub details: BTreeMap<String, serde_json::Value>,
    /// Creation timestamp (Unix milliseconds).
    pub created_at_ms: u64,
    /// Last status change (Unix milliseconds).
    pub updated_at_ms: u64,
}

impl PendingOrder {
    #[must_use]
    pub fn new(order_id: OrderId, intent: OrderIntent, now_ms: u64) -> Self {
        Self {
            order_id,
            intent,
            status: OrderStatus::Pending,
            details: BTreeMap::new(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }
}

// ============================================================================
// Audit
// ============================================================================

/// Audit event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    OrderSubmitted,
    OrderRejected,
    OrderError,
    OrderStatusUpdate,
    ExecutionDowngraded,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OrderSubmitted => "order_submitted",
            Self::OrderRejected => "order_rejected",
            Self::OrderError => "order_error",
            Self::OrderStatusUpdate => "order_status_update",
            Self::ExecutionDowngraded => "execution_downgraded",
        };
        f.write_str(s)
    }
}

/// Append-only audit record. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<IntentId>,
    pub payload: serde_json::Value,
    pub timestamp_ms: u64,
}

impl AuditEvent {
    #[must_use]
    pub fn new(kind: AuditEventKind, payload: serde_json::Value, timestamp_ms: u64) -> Self {
        Self {
            kind,
            order_id: None,
            intent_id: None,
            payload,
            timestamp_ms,
        }
    }

    #[must_use]
    pub fn with_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    #[must_use]
    pub fn with_intent(mut self, intent_id: IntentId) -> Self {
        self.intent_id = Some(intent_id);
        self
    }
}
