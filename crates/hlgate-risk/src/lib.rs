//! Admission risk controls for hlgate.
//!
//! Implements the checks an order must pass before and during execution:
//! - OrderValidator: Size, notional, position, TIF and price sanity rules
//! - CircuitBreaker: Per-path sliding-window failure tracking with cooldown
//! - BudgetGuard: Rolling-window drawdown trigger
//! - LiveGuard: Single go/no-go decision over data health, breakers and budget

pub mod budget_guard;
pub mod circuit_breaker;
pub mod error;
pub mod live_guard;
pub mod validator;

pub use budget_guard::{BudgetConfig, BudgetGuard, BudgetStatus};
pub use circuit_breaker::{
    BreakerConfig, BreakerStatus, CircuitBreaker, CircuitBreakers, INFO_API, ORDER_API,
};
pub use error::{RiskError, RiskResult};
pub use live_guard::{
    DataHealth, DataHealthProvider, LiveGuard, LiveGuardDecision, LiveGuardReason,
    StaticDataHealth,
};
pub use validator::{
    OrderValidator, Positions, PriceBand, PriceProvider, RiskLimits, StaticPriceProvider,
};
