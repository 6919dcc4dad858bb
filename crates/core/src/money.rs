use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

/// A currency amount held at two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Parse a user- or OCR-supplied amount such as `23.48`, `$23.48` or
    /// `1,234.56`. Negative amounts are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let clean: String = text
            .trim()
            .chars()
            .filter(|c| *c != '$' && *c != ',')
            .collect();
        let dec = Decimal::from_str(clean.trim()).ok()?;
        if dec.is_sign_negative() && !dec.is_zero() {
            return None;
        }
        Some(Money::from_decimal(dec))
    }

    pub fn to_cents(self) -> Option<i64> {
        (self.0 * Decimal::from(100)).round().to_i64()
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}
