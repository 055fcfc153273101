//! Order admission and resilient submission for hlgate.
//!
//! # Key Components
//!
//! - [`IdempotencyCache`]: Time-windowed LRU deduplication of intent ids
//! - [`OrderBus`]: Admission orchestrator (dedup, validate, clip, record, audit)
//! - [`TokenBucket`]: Async token bucket per exchange channel
//! - [`SubmissionClient`]: Classified errors with retry and backoff
//! - [`OrderExecutor`]: Live guard gating and breaker/budget feedback
//!
//! # Admission Order (in `OrderBus::submit`)
//!
//! 1. Idempotency -> duplicate (no audit)
//! 2. Validation -> rejected (`order_rejected`), or clipped when enabled
//! 3. Order id + PendingOrder
//! 4. `order_submitted` audit -> accepted

pub mod error;
pub mod executor;
pub mod idempotency;
pub mod order_bus;
pub mod rate_limiter;
pub mod submission;

pub use error::{ExecutorError, ExecutorResult};
pub use executor::{DowngradeReason, ExecutionOutcome, ExecutorConfig, OrderExecutor};
pub use idempotency::{IdempotencyCache, IdempotencyConfig, IdempotencyRecord};
pub use order_bus::{OrderBus, OrderBusConfig, DEFAULT_LIST_LIMIT};
pub use rate_limiter::{
    BucketConfig, BucketStats, Channel, RateLimitConfig, RateLimiters, TokenBucket,
};
pub use submission::{
    BoxFuture, ErrorType, ExchangeError, ExchangeResponse, ExecutionClient, MockExecutionClient,
    OrderPayload, RetryConfig, SendResult, SubmissionClient,
};
