//! Application configuration.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use hlgate_core::Symbol;
use hlgate_executor::{IdempotencyConfig, OrderBusConfig, RateLimitConfig, RetryConfig};
use hlgate_risk::{BreakerConfig, BudgetConfig, RiskLimits, ORDER_API};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Config path used when neither the CLI flag nor the env var is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Env var naming the config file.
pub const CONFIG_ENV_VAR: &str = "HLGATE_CONFIG";

/// Live trading switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingConfig {
    /// When false every order is executed as a dry run.
    #[serde(default)]
    pub enabled: bool,
    /// Consult the live guard before live sends.
    #[serde(default = "default_live_guard")]
    pub live_guard: bool,
    /// Breaker path fed by order sends.
    #[serde(default = "default_path")]
    pub default_path: String,
}

fn default_live_guard() -> bool {
    true
}

fn default_path() -> String {
    ORDER_API.to_string()
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            live_guard: default_live_guard(),
            default_path: default_path(),
        }
    }
}

/// `[risk]`: validator limits plus admission options.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(flatten)]
    pub limits: RiskLimits,
    /// Clip size-bound violations instead of rejecting.
    #[serde(default)]
    pub auto_clip: bool,
    /// Reference prices by symbol name, overriding the built-in table.
    #[serde(default)]
    pub reference_prices: BTreeMap<String, Decimal>,
}

/// `[breaker]`: default thresholds plus per-path overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BreakerSection {
    #[serde(flatten)]
    pub defaults: BreakerConfig,
    #[serde(default)]
    pub paths: HashMap<String, BreakerConfig>,
}

/// `[orders]`: pending order bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdersConfig {
    #[serde(default = "default_terminal_retention_hours")]
    pub terminal_retention_hours: u64,
    #[serde(default = "default_audit_tail_capacity")]
    pub audit_tail_capacity: usize,
}

fn default_terminal_retention_hours() -> u64 {
    6
}

fn default_audit_tail_capacity() -> usize {
    500
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            terminal_retention_hours: default_terminal_retention_hours(),
            audit_tail_capacity: default_audit_tail_capacity(),
        }
    }
}

/// `[audit]`: audit trail location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("data/audit")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: default_audit_dir(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl AppConfig {
    /// Load from `path`, else `HLGATE_CONFIG`, else the default path.
    ///
    /// A missing default file yields defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(&path);
        }
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::from_file(DEFAULT_CONFIG_PATH)
        } else {
            tracing::warn!(path = DEFAULT_CONFIG_PATH, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        let limits = &self.risk.limits;
        if limits.min_size <= Decimal::ZERO || limits.min_size > limits.max_size {
            return Err(AppError::Config(format!(
                "risk.min_size must be positive and <= max_size ({} > {})",
                limits.min_size, limits.max_size
            )));
        }
        for symbol in limits.price_bands.keys() {
            Symbol::from_str(symbol)
                .map_err(|e| AppError::Config(format!("risk.price_bands: {e}")))?;
        }
        for (symbol, band) in &limits.price_bands {
            if band.low > band.high {
                return Err(AppError::Config(format!(
                    "risk.price_bands.{symbol}: low {} above high {}",
                    band.low, band.high
                )));
            }
        }
        self.reference_prices()?;
        if self.budget.initial_balance <= Decimal::ZERO {
            return Err(AppError::Config(
                "budget.initial_balance must be positive".to_string(),
            ));
        }
        let buckets = [
            ("info", &self.rate_limit.info),
            ("order", &self.rate_limit.order),
        ];
        for (channel, bucket) in buckets {
            if !(bucket.rps.is_finite() && bucket.rps >= 0.0) {
                return Err(AppError::Config(format!(
                    "rate_limit.{channel}.rps must be finite and non-negative, got {}",
                    bucket.rps
                )));
            }
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(AppError::Config(format!(
                "retry.jitter must be in [0, 1), got {}",
                self.retry.jitter
            )));
        }
        Ok(())
    }

    /// Configured reference prices with parsed symbols.
    pub fn reference_prices(&self) -> AppResult<Vec<(Symbol, Decimal)>> {
        self.risk
            .reference_prices
            .iter()
            .map(|(name, px)| {
                let symbol = Symbol::from_str(name)
                    .map_err(|e| AppError::Config(format!("risk.reference_prices: {e}")))?;
                if *px <= Decimal::ZERO {
                    return Err(AppError::Config(format!(
                        "risk.reference_prices.{name} must be positive"
                    )));
                }
                Ok((symbol, *px))
            })
            .collect()
    }

    /// Order bus settings assembled from `[risk]` and `[orders]`.
    #[must_use]
    pub fn order_bus(&self) -> OrderBusConfig {
        OrderBusConfig {
            auto_clip: self.risk.auto_clip,
            terminal_retention_hours: self.orders.terminal_retention_hours,
            audit_tail_capacity: self.orders.audit_tail_capacity,
        }
    }
}
