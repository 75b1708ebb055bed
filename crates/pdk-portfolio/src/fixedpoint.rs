//! Fixed-point money type.
//!
//! All money amounts in this system use a 1e-6 (micros) fixed-point
//! representation stored as `i64`. The newtype keeps monetary amounts from
//! mixing with unrelated integers (quantities, versions, ids) without a
//! compile-time signal; there is deliberately no `From<i64>` impl.

use pdk_schemas::{micros_from_decimal_str, micros_to_decimal_string, MoneyParseError};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A fixed-point monetary amount at 1e-6 scale. 1 USD = `Micros::new(1_000_000)`.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Micros(i64);

impl Micros {
    pub const ZERO: Micros = Micros(0);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    /// Whole-dollar constructor for literals in tests and defaults.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Micros(units * 1_000_000)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn abs(self) -> Micros {
        Micros(self.0.saturating_abs())
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn saturating_add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }

    /// Per-unit price × integer share quantity, with overflow detection.
    /// Overflow in a trade-value calculation is a critical error, never a
    /// routine saturation — callers must handle `None`.
    #[inline]
    pub fn checked_mul_qty(self, qty: i64) -> Option<Micros> {
        self.0.checked_mul(qty).map(Micros)
    }

    /// Parse a decimal string (broker wire format).
    pub fn from_decimal_str(s: &str) -> Result<Self, MoneyParseError> {
        micros_from_decimal_str(s).map(Micros)
    }

    /// Format as a decimal string with six fractional digits.
    pub fn to_decimal_string(self) -> String {
        micros_to_decimal_string(self.0)
    }
}

impl Add for Micros {
    type Output = Micros;
    #[inline]
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Micros;
    #[inline]
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0 - rhs.0)
    }
}

impl Neg for Micros {
    type Output = Micros;
    #[inline]
    fn neg(self) -> Micros {
        Micros(-self.0)
    }
}

impl AddAssign for Micros {
    #[inline]
    fn add_assign(&mut self, rhs: Micros) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Micros {
    #[inline]
    fn sub_assign(&mut self, rhs: Micros) {
        self.0 -= rhs.0;
    }
}

impl std::fmt::Display for Micros {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sub_roundtrip() {
        let a = Micros::from_units(100);
        let b = Micros::from_units(25);
        assert_eq!((a + b) - b, a);
    }

    #[test]
    fn checked_mul_qty_detects_overflow() {
        assert_eq!(
            Micros::from_units(100).checked_mul_qty(10),
            Some(Micros::from_units(1_000))
        );
        assert_eq!(Micros::new(i64::MAX).checked_mul_qty(2), None);
    }

    #[test]
    fn decimal_string_round_trip() {
        let m = Micros::from_decimal_str("150.250000").unwrap();
        assert_eq!(m.raw(), 150_250_000);
        assert_eq!(m.to_decimal_string(), "150.250000");
    }

    #[test]
    fn serde_is_transparent_i64() {
        let j = serde_json::to_string(&Micros::from_units(2)).unwrap();
        assert_eq!(j, "2000000");
    }
}
