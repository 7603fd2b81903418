//! Decimal price and volume types
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point
//! errors). All asset-facing amounts are scaled to the asset's configured
//! accuracy with explicit HALF_UP rounding; directed rounding (away from or
//! toward zero) is used where a rounding error must never favor the client.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A non-negative order/trade price.
///
/// `Price::ZERO` doubles as the "no quote" sentinel for best-price reads.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str_exact(s).map(Self)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A signed order volume.
///
/// The sign carries the side: positive = buy, negative = sell.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Volume(Decimal);

impl Volume {
    pub const ZERO: Volume = Volume(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Buy orders carry positive volume
    pub fn is_buy(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn abs(&self) -> Decimal {
        self.0.abs()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Volume {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str_exact(s).map(Self)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round to `scale` decimal places, half-up (midpoint away from zero).
pub fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to `scale` decimal places with an explicit direction.
///
/// `away_from_zero = true` enlarges the absolute value; `false` truncates
/// toward zero. The caller picks the direction that cannot favor the
/// client of the amount being rounded.
pub fn scale_directed(value: Decimal, scale: u32, away_from_zero: bool) -> Decimal {
    let strategy = if away_from_zero {
        RoundingStrategy::AwayFromZero
    } else {
        RoundingStrategy::ToZero
    };
    value.round_dp_with_strategy(scale, strategy)
}

/// Full-precision division.
///
/// Returns `None` on a zero divisor instead of panicking.
pub fn div_max_scale(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    numerator.checked_div(denominator)
}

/// True if `value` needs no more than `scale` decimal places.
///
/// Trailing zeros are ignored ("1.10" fits scale 1).
pub fn fits_scale(value: Decimal, scale: u32) -> bool {
    value.normalize().scale() <= scale
}
