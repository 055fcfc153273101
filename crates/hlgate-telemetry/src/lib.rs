//! Prometheus metrics and structured logging for hlgate.
//!
//! Provides:
//! - Prometheus metrics for admission outcomes, breakers, drawdown,
//!   rate limiting and submission attempts
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
