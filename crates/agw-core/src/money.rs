// SPDX-License-Identifier: MIT OR Apache-2.0

//! Micro-currency conversion for exact budget arithmetic.
//!
//! Costs travel as `f64` dollars on the wire and in records, rendered to six
//! fractional digits in canonical payloads. Comparisons (budget sums, trial
//! ceilings) happen in integer micro-units so that exactly-at-cap boundaries
//! behave deterministically.

/// Convert a dollar amount to integer micro-units (10⁻⁶).
///
/// # Examples
///
/// ```
/// assert_eq!(agw_core::money::to_micros(0.05), 50_000);
/// assert_eq!(agw_core::money::to_micros(9.99) + agw_core::money::to_micros(0.01), 10_000_000);
/// ```
#[must_use]
pub fn to_micros(amount: f64) -> i64 {
    (amount * 1_000_000.0).round() as i64
}

/// Convert micro-units back to a dollar amount.
#[must_use]
pub fn from_micros(micros: i64) -> f64 {
    micros as f64 / 1_000_000.0
}

/// Render a dollar amount with exactly six fractional digits, as required by
/// the canonical metering payload.
#[must_use]
pub fn format_6dp(amount: f64) -> String {
    format!("{amount:.6}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_are_exact_at_boundaries() {
        // 9.99 + 0.01 == 10.00 in micros even though f64 addition overshoots.
        let sum = to_micros(9.99) + to_micros(0.01);
        assert_eq!(sum, to_micros(10.00));
        assert!(to_micros(9.99) + to_micros(0.02) > to_micros(10.00));
    }

    #[test]
    fn roundtrip_within_six_digits() {
        for amount in [0.0, 0.000001, 0.05, 1.5, 123.456789] {
            let back = from_micros(to_micros(amount));
            assert!((back - amount).abs() < 0.000_000_6, "{amount} -> {back}");
        }
    }

    #[test]
    fn six_digit_rendering() {
        assert_eq!(format_6dp(0.05), "0.050000");
        assert_eq!(format_6dp(0.0), "0.000000");
        assert_eq!(format_6dp(12.3456789), "12.345679");
    }
}
