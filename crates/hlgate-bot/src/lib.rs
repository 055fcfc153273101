//! hlgate application.
//!
//! Wires the admission pipeline end to end:
//! - Configuration from TOML with per-section defaults
//! - Order bus admission (dedup, validation, audit)
//! - Execution through the live guard, rate limiter and retrying client
//! - Paper client for runs without exchange credentials

pub mod app;
pub mod config;
pub mod error;
pub mod paper;

pub use app::{Application, IntentOutcome, RunStats};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use paper::PaperExecutionClient;
