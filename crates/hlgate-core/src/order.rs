//! Order intents and their identifiers.
//!
//! An [`OrderIntent`] is a proposed trade that has not yet been admitted.
//! Construction enforces the structural invariants (positive size under the
//! hard ceiling, limit price iff limit order); risk limits are the
//! validator's job.

use crate::decimal::{Price, Size};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Absolute size ceiling enforced at construction, independent of risk limits.
pub const HARD_SIZE_CEILING: Decimal = dec!(1000000);

/// Supported instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Symbol {
    Btc,
    Eth,
    Sol,
    Hype,
    Bnb,
}

impl Symbol {
    pub const ALL: [Symbol; 5] = [
        Symbol::Btc,
        Symbol::Eth,
        Symbol::Sol,
        Symbol::Hype,
        Symbol::Bnb,
    ];

    /// Exchange asset index used in order payloads.
    #[must_use]
    pub fn asset_index(&self) -> u32 {
        match self {
            Self::Btc => 0,
            Self::Eth => 1,
            Self::Sol => 2,
            Self::Hype => 3,
            Self::Bnb => 4,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Btc => "BTC",
            Self::Eth => "ETH",
            Self::Sol => "SOL",
            Self::Hype => "HYPE",
            Self::Bnb => "BNB",
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|sym| sym.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnsupportedSymbol(s.to_string()))
    }
}

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns 1 for buy, -1 for sell (for position calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Self::Buy)
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Limit => write!(f, "limit"),
        }
    }
}

/// Time-in-force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled.
    #[default]
    #[serde(rename = "Gtc", alias = "GTC")]
    GoodTilCancelled,
    /// Immediate-or-cancel.
    #[serde(rename = "Ioc", alias = "IOC")]
    ImmediateOrCancel,
    /// Add-liquidity-only. Accepted by the exchange but outside the
    /// default admission set.
    #[serde(rename = "Alo", alias = "ALO")]
    AddLiquidityOnly,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoodTilCancelled => write!(f, "Gtc"),
            Self::ImmediateOrCancel => write!(f, "Ioc"),
            Self::AddLiquidityOnly => write!(f, "Alo"),
        }
    }
}

/// Identifier of one logical submission.
///
/// Retries of the same decision must reuse the same id; the idempotency
/// cache keys on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(String);

impl IntentId {
    /// Generate a fresh id.
    ///
    /// Format: `intent_{uuid_simple}`
    pub fn generate() -> Self {
        Self(format!("intent_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for IntentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IntentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Order id assigned by the bus on admission.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Derive an order id from the intent id and admission time.
    ///
    /// Format: `ord_{intent_id}_{timestamp_ms}_{seq}`. The sequence number
    /// keeps ids unique when two admissions share a millisecond.
    pub fn derive(intent_id: &IntentId, timestamp_ms: u64, seq: u64) -> Self {
        Self(format!("ord_{intent_id}_{timestamp_ms}_{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A proposed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub intent_id: IntentId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub size: Size,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_px: Option<Price>,
    #[serde(default)]
    pub tif: TimeInForce,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<Decimal>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    /// Market order with a generated intent id.
    pub fn market(symbol: Symbol, side: OrderSide, size: Size) -> Result<Self> {
        Self::new(symbol, side, size, OrderKind::Market, None)
    }

    /// Limit order with a generated intent id.
    pub fn limit(symbol: Symbol, side: OrderSide, size: Size, limit_px: Price) -> Result<Self> {
        Self::new(symbol, side, size, OrderKind::Limit, Some(limit_px))
    }

    /// Construct and check structural invariants.
    pub fn new(
        symbol: Symbol,
        side: OrderSide,
        size: Size,
        kind: OrderKind,
        limit_px: Option<Price>,
    ) -> Result<Self> {
        let intent = Self {
            intent_id: IntentId::generate(),
            symbol,
            side,
            size,
            kind,
            limit_px,
            tif: TimeInForce::default(),
            reduce_only: false,
            leverage: None,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        };
        intent.check_invariants()?;
        Ok(intent)
    }

    /// Replace the generated intent id with a caller-supplied one.
    pub fn with_intent_id(mut self, intent_id: impl Into<IntentId>) -> Self {
        self.intent_id = intent_id.into();
        self
    }

    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    pub fn with_reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = reduce_only;
        self
    }

    pub fn with_leverage(mut self, leverage: Decimal) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Copy of this intent with a different size. Used for risk clipping;
    /// invariants are not re-checked here because the validator re-validates
    /// the copy.
    #[must_use]
    pub fn with_size(&self, size: Size) -> Self {
        Self {
            size,
            ..self.clone()
        }
    }

    /// Check the structural invariants of an intent.
    ///
    /// Deserialized intents bypass the constructors, so callers that accept
    /// external input should run this explicitly.
    pub fn check_invariants(&self) -> Result<()> {
        if !self.size.is_positive() {
            return Err(CoreError::InvalidSize(format!(
                "size must be positive, got {}",
                self.size
            )));
        }
        if self.size.inner() > HARD_SIZE_CEILING {
            return Err(CoreError::InvalidSize(format!(
                "size {} exceeds hard ceiling {}",
                self.size, HARD_SIZE_CEILING
            )));
        }
        match (self.kind, self.limit_px) {
            (OrderKind::Limit, None) => Err(CoreError::InvalidOrder(
                "limit price required for limit orders".to_string(),
            )),
            (OrderKind::Market, Some(_)) => Err(CoreError::InvalidOrder(
                "limit price not allowed for market orders".to_string(),
            )),
            (OrderKind::Limit, Some(px)) if !px.is_positive() => Err(CoreError::InvalidPrice(
                format!("limit price must be positive, got {px}"),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_parse() {
        assert_eq!("btc".parse::<Symbol>().unwrap(), Symbol::Btc);
        assert_eq!("HYPE".parse::<Symbol>().unwrap(), Symbol::Hype);
        assert!(matches!(
            "DOGE".parse::<Symbol>(),
            Err(CoreError::UnsupportedSymbol(_))
        ));
    }

    #[test]
    fn test_symbol_asset_index() {
        let indices: Vec<u32> = Symbol::ALL.iter().map(Symbol::asset_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_market_intent() {
        let intent =
            OrderIntent::market(Symbol::Btc, OrderSide::Buy, Size::new(dec!(0.01))).unwrap();
        assert_eq!(intent.kind, OrderKind::Market);
        assert!(intent.limit_px.is_none());
        assert_eq!(intent.tif, TimeInForce::GoodTilCancelled);
        assert!(intent.intent_id.as_str().starts_with("intent_"));
    }

    #[test]
    fn test_rejects_non_positive_size() {
        let result = OrderIntent::market(Symbol::Eth, OrderSide::Sell, Size::ZERO);
        assert!(matches!(result, Err(CoreError::InvalidSize(_))));
    }

    #[test]
    fn test_rejects_size_above_ceiling() {
        let result = OrderIntent::market(Symbol::Eth, OrderSide::Sell, Size::new(dec!(1000000.1)));
        assert!(matches!(result, Err(CoreError::InvalidSize(_))));
        // Above every risk limit but still constructible; the validator rejects it
        assert!(OrderIntent::market(Symbol::Btc, OrderSide::Buy, Size::new(dec!(5000))).is_ok());
    }

    #[test]
    fn test_limit_price_rules() {
        let missing = OrderIntent::new(
            Symbol::Sol,
            OrderSide::Buy,
            Size::new(dec!(1)),
            OrderKind::Limit,
            None,
        );
        assert!(matches!(missing, Err(CoreError::InvalidOrder(_))));

        let forbidden = OrderIntent::new(
            Symbol::Sol,
            OrderSide::Buy,
            Size::new(dec!(1)),
            OrderKind::Market,
            Some(Price::new(dec!(100))),
        );
        assert!(matches!(forbidden, Err(CoreError::InvalidOrder(_))));

        let negative = OrderIntent::limit(
            Symbol::Sol,
            OrderSide::Buy,
            Size::new(dec!(1)),
            Price::new(dec!(-1)),
        );
        assert!(matches!(negative, Err(CoreError::InvalidPrice(_))));
    }

    #[test]
    fn test_with_size_keeps_identity() {
        let intent = OrderIntent::market(Symbol::Btc, OrderSide::Buy, Size::new(dec!(5)))
            .unwrap()
            .with_intent_id("abc");
        let clipped = intent.with_size(Size::new(dec!(2)));
        assert_eq!(clipped.intent_id, intent.intent_id);
        assert_eq!(clipped.size.inner(), dec!(2));
        assert_eq!(intent.size.inner(), dec!(5));
    }

    #[test]
    fn test_order_id_format() {
        let id = OrderId::derive(&IntentId::from("abc"), 1_700_000_000_000, 7);
        assert_eq!(id.as_str(), "ord_abc_1700000000000_7");
    }

    #[test]
    fn test_intent_serde() {
        let json = r#"{"intent_id":"x1","symbol":"ETH","side":"SELL","size":"0.5","type":"limit","limit_px":"3000","tif":"IOC"}"#;
        let intent: OrderIntent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.symbol, Symbol::Eth);
        assert_eq!(intent.side, OrderSide::Sell);
        assert_eq!(intent.tif, TimeInForce::ImmediateOrCancel);
        assert_eq!(intent.limit_px, Some(Price::new(dec!(3000))));
        assert!(intent.check_invariants().is_ok());
    }
}
