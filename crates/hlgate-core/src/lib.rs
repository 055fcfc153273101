//! Core domain types for the hlgate order admission core.
//!
//! This crate provides the types shared by every stage of admission:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Symbol`, `OrderSide`, `OrderKind`, `TimeInForce`: Trading enums
//! - `OrderIntent`: A proposed trade with checked construction
//! - `ValidationResult`, `EnqueuedResult`, `PendingOrder`, `AuditEvent`
//! - `DenialKind`: Classification of every non-success outcome

pub mod decimal;
pub mod error;
pub mod execution;
pub mod order;

pub use decimal::{Price, Size, SIZE_SCALE};
pub use error::{CoreError, Result};
pub use order::{
    IntentId, OrderId, OrderIntent, OrderKind, OrderSide, Symbol, TimeInForce, HARD_SIZE_CEILING,
};

pub use execution::{
    AuditEvent, AuditEventKind, DenialKind, EnqueuedResult, OrderStatus, PendingOrder,
    ValidationResult, ViolationKind,
};

/// Current wall-clock time in Unix milliseconds.
#[inline]
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
