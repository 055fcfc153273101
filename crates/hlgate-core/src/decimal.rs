//! Precision-safe decimal types for order sizing.
//!
//! Uses `rust_decimal` so notional and headroom arithmetic is exact.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

/// Decimal places kept when a size is derived by division (notional clip).
pub const SIZE_SCALE: u32 = 8;

/// Price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Scale the price by `pct` percent (e.g. `-20` gives 80% of the price).
    #[inline]
    pub fn shifted_pct(&self, pct: Decimal) -> Self {
        Self(self.0 + self.0 * pct / Decimal::ONE_HUNDRED)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

/// Order size (base-asset quantity) with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Notional value: size * price, saturating at the decimal range.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0.saturating_mul(price.0)
    }

    /// Largest size whose notional at `price` stays within `cap`.
    ///
    /// Rounded toward zero at [`SIZE_SCALE`] so the result never exceeds the cap.
    /// Returns `None` for a non-positive price or when the quotient overflows.
    pub fn max_for_notional(cap: Decimal, price: Price) -> Option<Self> {
        if !price.is_positive() {
            return None;
        }
        let raw = cap.checked_div(price.0)?;
        Some(Self(
            raw.round_dp_with_strategy(SIZE_SCALE, RoundingStrategy::ToZero),
        ))
    }

    /// Size signed by side direction (`+` buy, `-` sell).
    #[inline]
    pub fn signed(&self, sign: i8) -> Decimal {
        if sign < 0 {
            -self.0
        } else {
            self.0
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Size {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_notional() {
        let size = Size::new(dec!(0.5));
        assert_eq!(size.notional(Price::new(dec!(50000))), dec!(25000));
    }

    #[test]
    fn test_max_for_notional_rounds_down() {
        let size = Size::max_for_notional(dec!(10000), Price::new(dec!(3))).unwrap();
        assert_eq!(size.inner(), dec!(3333.33333333));
        assert!(size.notional(Price::new(dec!(3))) <= dec!(10000));
    }

    #[test]
    fn test_notional_saturates_instead_of_overflowing() {
        let size = Size::new(Decimal::MAX);
        assert_eq!(size.notional(Price::new(dec!(50000))), Decimal::MAX);
        assert_eq!(Size::new(Decimal::MIN).notional(Price::new(dec!(2))), Decimal::MIN);
        assert!(Size::max_for_notional(Decimal::MAX, Price::new(dec!(0.0000001))).is_none());
    }

    #[test]
    fn test_max_for_notional_rejects_zero_price() {
        assert!(Size::max_for_notional(dec!(10000), Price::ZERO).is_none());
    }

    #[test]
    fn test_shifted_pct() {
        let px = Price::new(dec!(1000));
        assert_eq!(px.shifted_pct(dec!(-20)).inner(), dec!(800));
        assert_eq!(px.shifted_pct(dec!(20)).inner(), dec!(1200));
    }

    #[test]
    fn test_signed() {
        let size = Size::new(dec!(2));
        assert_eq!(size.signed(1), dec!(2));
        assert_eq!(size.signed(-1), dec!(-2));
    }

    #[test]
    fn test_parse() {
        let size: Size = "0.001".parse().unwrap();
        assert_eq!(size.inner(), dec!(0.001));
        assert!("abc".parse::<Price>().is_err());
    }
}
