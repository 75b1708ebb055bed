//! Decimal-string ↔ micros conversion.
//!
//! All monetary amounts in this system are `i64` micros (1e-6 USD). JSON and
//! broker wire formats carry decimal strings so no precision is lost in
//! transit. Conversion is exact: parsing rejects anything finer than six
//! fractional digits instead of rounding.

use std::fmt;

/// 1 USD = 1_000_000 micros.
pub const MICROS_PER_UNIT: i64 = 1_000_000;

/// Returned when a decimal string cannot be represented as micros exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoneyParseError {
    pub input: String,
    pub reason: &'static str,
}

impl fmt::Display for MoneyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad money literal {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for MoneyParseError {}

fn err(input: &str, reason: &'static str) -> MoneyParseError {
    MoneyParseError {
        input: input.to_string(),
        reason,
    }
}

/// Parse a decimal string (`"150.25"`, `"-0.0001"`) into micros.
///
/// Accepts an optional leading sign, an integer part, and up to six
/// fractional digits. More than six fractional digits is an error — the
/// caller sent a value this representation cannot hold exactly.
pub fn micros_from_decimal_str(s: &str) -> Result<i64, MoneyParseError> {
    let raw = s.trim();
    if raw.is_empty() {
        return Err(err(s, "empty"));
    }

    let (neg, body) = match raw.as_bytes()[0] {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };
    if body.is_empty() {
        return Err(err(s, "sign without digits"));
    }

    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(err(s, "no digits"));
    }
    if frac_part.len() > 6 {
        return Err(err(s, "more than six fractional digits"));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err(s, "non-digit in integer part"));
    }
    if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err(s, "non-digit in fractional part"));
    }

    let whole: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| err(s, "integer part overflow"))?
    };

    // Right-pad the fraction to six digits: "25" -> 250000.
    let mut frac: i64 = 0;
    for b in frac_part.bytes() {
        frac = frac * 10 + i64::from(b - b'0');
    }
    for _ in frac_part.len()..6 {
        frac *= 10;
    }

    let magnitude = whole
        .checked_mul(MICROS_PER_UNIT)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| err(s, "value overflows i64 micros"))?;

    Ok(if neg { -magnitude } else { magnitude })
}

/// Format micros as a decimal string with six fractional digits.
///
/// The inverse of [`micros_from_decimal_str`]: round-trips every `i64`
/// except `i64::MIN` (which no valid broker amount approaches).
pub fn micros_to_decimal_string(micros: i64) -> String {
    let units = micros / MICROS_PER_UNIT;
    let frac = (micros % MICROS_PER_UNIT).abs();
    if micros < 0 && units == 0 {
        format!("-{units}.{frac:06}")
    } else {
        format!("{units}.{frac:06}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integer() {
        assert_eq!(micros_from_decimal_str("150").unwrap(), 150_000_000);
    }

    #[test]
    fn parses_fraction_with_padding() {
        assert_eq!(micros_from_decimal_str("150.25").unwrap(), 150_250_000);
        assert_eq!(micros_from_decimal_str("0.0001").unwrap(), 100);
    }

    #[test]
    fn parses_negative() {
        assert_eq!(micros_from_decimal_str("-2.75").unwrap(), -2_750_000);
        assert_eq!(micros_from_decimal_str("-0.000001").unwrap(), -1);
    }

    #[test]
    fn rejects_seven_fractional_digits() {
        let e = micros_from_decimal_str("1.0000001").unwrap_err();
        assert_eq!(e.reason, "more than six fractional digits");
    }

    #[test]
    fn rejects_garbage() {
        assert!(micros_from_decimal_str("").is_err());
        assert!(micros_from_decimal_str("-").is_err());
        assert!(micros_from_decimal_str("1.2.3").is_err());
        assert!(micros_from_decimal_str("12a").is_err());
    }

    #[test]
    fn formats_six_digits() {
        assert_eq!(micros_to_decimal_string(150_000_000), "150.000000");
        assert_eq!(micros_to_decimal_string(-2_750_000), "-2.750000");
        // Sub-unit negatives keep the sign.
        assert_eq!(micros_to_decimal_string(-100), "-0.000100");
    }

    #[test]
    fn round_trips() {
        for v in [0_i64, 1, -1, 150_250_000, -999_999, 42_000_000_000] {
            let s = micros_to_decimal_string(v);
            assert_eq!(micros_from_decimal_str(&s).unwrap(), v, "via {s}");
        }
    }
}
