//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] hlgate_core::CoreError),

    #[error("Risk error: {0}")]
    Risk(#[from] hlgate_risk::RiskError),

    #[error("Executor error: {0}")]
    Executor(#[from] hlgate_executor::ExecutorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] hlgate_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] hlgate_persistence::PersistenceError),

    #[error("Invalid intent on line {line}: {reason}")]
    Intent { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
