//! Order validation and risk clipping.
//!
//! Every rule runs on every call; violations are collected rather than
//! short-circuited so callers see the full picture. Validation reads only
//! the static limits, the caller's position map and the price provider.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use hlgate_core::{
    OrderIntent, OrderKind, Price, Size, Symbol, TimeInForce, ValidationResult, ViolationKind,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Signed position per symbol (`+` long, `-` short).
pub type Positions = HashMap<Symbol, Decimal>;

// ============================================================================
// PriceProvider
// ============================================================================

/// Source of reference prices for notional checks.
pub trait PriceProvider: Send + Sync {
    /// Current mid price for the symbol, or `None` if unavailable.
    fn mid_price(&self, symbol: Symbol) -> Option<Price>;
}

/// Price provider backed by a fixed table.
#[derive(Debug, Default)]
pub struct StaticPriceProvider {
    prices: RwLock<HashMap<Symbol, Price>>,
}

impl StaticPriceProvider {
    #[must_use]
    pub fn new(prices: HashMap<Symbol, Price>) -> Self {
        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Reference table used when no price feed is wired in.
    #[must_use]
    pub fn with_reference_prices() -> Self {
        let prices = [
            (Symbol::Btc, 50_000),
            (Symbol::Eth, 3_000),
            (Symbol::Sol, 100),
            (Symbol::Bnb, 300),
        ]
        .into_iter()
        .map(|(sym, px)| (sym, Price::new(Decimal::from(px))))
        .chain(std::iter::once((Symbol::Hype, Price::new(Decimal::new(1, 1)))))
        .collect();
        Self::new(prices)
    }

    pub fn set_price(&self, symbol: Symbol, price: Price) {
        self.prices.write().insert(symbol, price);
    }

    pub fn remove_price(&self, symbol: Symbol) {
        self.prices.write().remove(&symbol);
    }
}

impl PriceProvider for StaticPriceProvider {
    fn mid_price(&self, symbol: Symbol) -> Option<Price> {
        self.prices.read().get(&symbol).copied()
    }
}

// ============================================================================
// RiskLimits
// ============================================================================

/// Inclusive sanity band for limit prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBand {
    pub low: Decimal,
    pub high: Decimal,
}

impl PriceBand {
    #[must_use]
    pub fn contains(&self, px: Price) -> bool {
        px.inner() >= self.low && px.inner() <= self.high
    }
}

/// Static limits applied by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    #[serde(default = "default_min_size")]
    pub min_size: Decimal,
    #[serde(default = "default_max_size")]
    pub max_size: Decimal,
    /// Maximum notional (USD) per order.
    #[serde(default = "default_max_notional")]
    pub max_notional: Decimal,
    /// Maximum absolute position per symbol after the order.
    #[serde(default = "default_max_position")]
    pub max_position: Decimal,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,
    #[serde(default = "default_allowed_tifs")]
    pub allowed_tifs: Vec<TimeInForce>,
    /// Per-symbol limit price bands keyed by symbol name ("BTC").
    #[serde(default = "default_price_bands")]
    pub price_bands: BTreeMap<String, PriceBand>,
    /// Band half-width (percent of reference price) for symbols without a band.
    #[serde(default = "default_band_pct")]
    pub default_band_pct: Decimal,
}

fn default_min_size() -> Decimal {
    Decimal::new(1, 3)
}

fn default_max_size() -> Decimal {
    Decimal::from(100)
}

fn default_max_notional() -> Decimal {
    Decimal::from(10_000)
}

fn default_max_position() -> Decimal {
    Decimal::from(1_000)
}

fn default_max_leverage() -> Decimal {
    Decimal::from(10)
}

fn default_allowed_tifs() -> Vec<TimeInForce> {
    vec![TimeInForce::GoodTilCancelled, TimeInForce::ImmediateOrCancel]
}

fn default_price_bands() -> BTreeMap<String, PriceBand> {
    let band = |low: Decimal, high: Decimal| PriceBand { low, high };
    BTreeMap::from([
        (
            "BTC".to_string(),
            band(Decimal::from(40_000), Decimal::from(60_000)),
        ),
        (
            "ETH".to_string(),
            band(Decimal::from(2_000), Decimal::from(4_000)),
        ),
        ("SOL".to_string(), band(Decimal::from(50), Decimal::from(150))),
        (
            "HYPE".to_string(),
            band(Decimal::new(5, 2), Decimal::new(15, 2)),
        ),
        ("BNB".to_string(), band(Decimal::from(200), Decimal::from(400))),
    ])
}

fn default_band_pct() -> Decimal {
    Decimal::from(20)
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            max_size: default_max_size(),
            max_notional: default_max_notional(),
            max_position: default_max_position(),
            max_leverage: default_max_leverage(),
            allowed_tifs: default_allowed_tifs(),
            price_bands: default_price_bands(),
            default_band_pct: default_band_pct(),
        }
    }
}

// ============================================================================
// OrderValidator
// ============================================================================

/// Stateless rule and limit checks for order intents.
pub struct OrderValidator {
    limits: RiskLimits,
    prices: Arc<dyn PriceProvider>,
}

impl OrderValidator {
    #[must_use]
    pub fn new(limits: RiskLimits, prices: Arc<dyn PriceProvider>) -> Self {
        Self { limits, prices }
    }

    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Validate an intent against the limits and current positions.
    #[must_use]
    pub fn validate(&self, intent: &OrderIntent, positions: &Positions) -> ValidationResult {
        let limits = &self.limits;
        let size = intent.size.inner();
        let mut errors: Vec<(ViolationKind, String)> = Vec::new();
        let mut warnings = Vec::new();
        let mut clip_candidates: Vec<Decimal> = Vec::new();

        if size <= Decimal::ZERO {
            errors.push((
                ViolationKind::NonPositiveSize,
                format!("Size must be positive (got {size})"),
            ));
        } else if size < limits.min_size {
            errors.push((
                ViolationKind::BelowMinSize,
                format!("Size {size} below minimum {}", limits.min_size),
            ));
        }

        if size > limits.max_size {
            errors.push((
                ViolationKind::AboveMaxSize,
                format!("Size {size} exceeds maximum {}", limits.max_size),
            ));
            clip_candidates.push(limits.max_size);
        }

        match (intent.kind, intent.limit_px) {
            (OrderKind::Limit, None) => errors.push((
                ViolationKind::MissingLimitPrice,
                "Limit price required for limit orders".to_string(),
            )),
            (OrderKind::Market, Some(_)) => errors.push((
                ViolationKind::UnexpectedLimitPrice,
                "Limit price not allowed for market orders".to_string(),
            )),
            (OrderKind::Limit, Some(px)) if !px.is_positive() => errors.push((
                ViolationKind::NonPositiveLimitPrice,
                format!("Limit price must be positive (got {px})"),
            )),
            _ => {}
        }

        if !limits.allowed_tifs.contains(&intent.tif) {
            errors.push((
                ViolationKind::UnsupportedTif,
                format!("Time-in-force {} not supported", intent.tif),
            ));
        }

        if let Some(leverage) = intent.leverage {
            if leverage > limits.max_leverage {
                errors.push((
                    ViolationKind::LeverageCap,
                    format!(
                        "Leverage {leverage} exceeds maximum {}",
                        limits.max_leverage
                    ),
                ));
            }
        }

        let reference_px = self.prices.mid_price(intent.symbol);
        match reference_px {
            Some(px) if px.is_positive() => {
                let notional = intent.size.notional(px);
                if notional > limits.max_notional {
                    errors.push((
                        ViolationKind::NotionalCap,
                        format!(
                            "Notional ${notional} exceeds limit ${}",
                            limits.max_notional
                        ),
                    ));
                    if let Some(cap_size) = Size::max_for_notional(limits.max_notional, px) {
                        clip_candidates.push(cap_size.inner());
                    }
                }
            }
            _ => errors.push((
                ViolationKind::PriceUnavailable,
                format!("Reference price unavailable for {}", intent.symbol),
            )),
        }

        let current = positions.get(&intent.symbol).copied().unwrap_or_default();
        let sign = intent.side.sign();
        let resulting = current.saturating_add(intent.size.signed(sign));
        if intent.reduce_only {
            if resulting.abs() > current.abs() {
                errors.push((
                    ViolationKind::ReduceOnlyIncrease,
                    format!(
                        "Reduce-only order would increase position from {current} to {resulting}"
                    ),
                ));
            }
        } else if resulting.abs() > limits.max_position {
            errors.push((
                ViolationKind::PositionLimit,
                format!(
                    "Position would be {resulting} (max: {})",
                    limits.max_position
                ),
            ));
            let headroom = limits
                .max_position
                .saturating_sub(Size::new(current).signed(sign));
            clip_candidates.push(headroom.max(Decimal::ZERO));
        }

        if let Some(px) = intent.limit_px.filter(Price::is_positive) {
            if let Some(band) = self.band_for(intent.symbol, reference_px) {
                if !band.contains(px) {
                    warnings.push(format!(
                        "Limit price {px} outside sanity band [{}, {}] for {}",
                        band.low, band.high, intent.symbol
                    ));
                }
            }
        }

        let clipped_size = clip_candidates
            .into_iter()
            .filter(|c| *c < size)
            .min()
            .map(Size::new);

        if !errors.is_empty() {
            debug!(
                intent_id = %intent.intent_id,
                error_count = errors.len(),
                clipped = clipped_size.is_some(),
                "Intent failed validation"
            );
        }

        ValidationResult::new(errors, warnings, clipped_size)
    }

    /// Re-validate and return a copy sized to the tightest violated bound.
    ///
    /// Returns an unchanged copy when no size bound was violated. Never
    /// increases size.
    #[must_use]
    pub fn clip_to_risk(&self, intent: &OrderIntent, positions: &Positions) -> OrderIntent {
        match self.validate(intent, positions).clipped_size {
            Some(clipped) => intent.with_size(clipped),
            None => intent.clone(),
        }
    }

    fn band_for(&self, symbol: Symbol, reference_px: Option<Price>) -> Option<PriceBand> {
        if let Some(band) = self.limits.price_bands.get(symbol.as_str()) {
            return Some(*band);
        }
        reference_px.filter(Price::is_positive).map(|px| PriceBand {
            low: px.shifted_pct(-self.limits.default_band_pct).inner(),
            high: px.shifted_pct(self.limits.default_band_pct).inner(),
        })
    }
}
