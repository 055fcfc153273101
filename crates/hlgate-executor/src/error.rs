//! Executor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error("Order {order_id} is not pending (status: {status})")]
    NotPending {
        order_id: String,
        status: hlgate_core::OrderStatus,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit write failed: {0}")]
    Audit(#[from] hlgate_persistence::PersistenceError),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
