/// Fixed-point price of an outcome contract
///
/// A price is an implied probability stored as an integer number of ticks,
/// where one tick is 1/10_000 (a basis point). All comparisons happen on the
/// integer representation, so two prices are equal only if their tick counts
/// are equal.
///
/// ## Range
/// Tradable prices lie in `[0.01, 0.99]`, i.e. `100..=9900` ticks. The book and
/// the matching algorithm accept any tick value; the validator rejects orders
/// outside the tradable range before they reach the engine.
///
/// ## Example
/// ```rust
/// use outcome_engine::domain::price::Price;
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// let p = Price::from_decimal(Decimal::from_str("0.60").unwrap()).unwrap();
/// assert_eq!(p.ticks(), 6_000);
/// assert_eq!(p.to_string(), "0.6");
/// ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of ticks in one whole unit (probability 1.0)
pub const TICKS_PER_UNIT: u64 = 10_000;

/// Decimal places represented by one tick
const TICK_SCALE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("price {0} is not a multiple of the 0.0001 tick")]
    OffTick(Decimal),

    #[error("price {0} is negative or too large")]
    Unrepresentable(Decimal),

    #[error("cannot parse price '{0}'")]
    Parse(String),
}

/// Price in ticks of 1/10_000
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    /// Lowest tradable price (0.01)
    pub const MIN_TRADABLE: Price = Price(100);

    /// Highest tradable price (0.99)
    pub const MAX_TRADABLE: Price = Price(9_900);

    #[inline]
    pub const fn from_ticks(ticks: u64) -> Self {
        Price(ticks)
    }

    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Exact conversion from a decimal probability such as `0.55`.
    pub fn from_decimal(value: Decimal) -> Result<Self, PriceError> {
        if value.is_sign_negative() {
            return Err(PriceError::Unrepresentable(value));
        }
        let scaled = value
            .checked_mul(Decimal::from(TICKS_PER_UNIT))
            .ok_or(PriceError::Unrepresentable(value))?;
        if !scaled.fract().is_zero() {
            return Err(PriceError::OffTick(value));
        }
        scaled
            .to_u64()
            .map(Price)
            .ok_or(PriceError::Unrepresentable(value))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0 as i64, TICK_SCALE).normalize()
    }

    /// Whether the price lies inside the tradable `[0.01, 0.99]` band.
    #[inline]
    pub fn is_tradable(self) -> bool {
        self >= Self::MIN_TRADABLE && self <= Self::MAX_TRADABLE
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Price {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|_| PriceError::Parse(s.to_string()))?;
        Price::from_decimal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_round_trip_on_tick() {
        let p: Price = "0.55".parse().unwrap();
        assert_eq!(p.ticks(), 5_500);
        assert_eq!(p.to_decimal(), Decimal::from_str("0.55").unwrap());
    }

    #[test]
    fn test_off_tick_rejected() {
        let err = "0.123456".parse::<Price>().unwrap_err();
        assert!(matches!(err, PriceError::OffTick(_)));
    }

    #[test]
    fn test_negative_rejected() {
        let err = "-0.5".parse::<Price>().unwrap_err();
        assert!(matches!(err, PriceError::Unrepresentable(_)));
    }

    #[test]
    fn test_tradable_band_is_inclusive() {
        assert!(Price::from_ticks(100).is_tradable());
        assert!(Price::from_ticks(9_900).is_tradable());
        assert!(!Price::from_ticks(99).is_tradable());
        assert!(!Price::from_ticks(9_901).is_tradable());
    }

    #[test]
    fn test_ordering_is_integer_based() {
        let a: Price = "0.5".parse().unwrap();
        let b: Price = "0.50".parse().unwrap();
        assert_eq!(a, b);
        assert!(Price::from_ticks(4_500) < a);
    }
}
