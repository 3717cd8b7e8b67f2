// ledger/src/money.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// An exact amount of the community currency, counted in minor units
/// (paise: 100 per rupee).
///
/// Signed so the pool can be driven below zero when the fund policy allows it.
/// Arithmetic is checked; nothing is ever rounded after construction.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    pub const DECIMALS: u32 = 2;
    pub const MINOR_PER_MAJOR: i64 = 100;

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Whole currency units, e.g. `Money::from_major(1000)` is 1000.00.
    pub const fn from_major(major: i64) -> Self {
        Self(major * Self::MINOR_PER_MAJOR)
    }

    /// Convert a display amount (as typed into a form) into minor units,
    /// rounding to the nearest paisa. Returns `None` for NaN, infinities and
    /// values outside the representable range.
    pub fn from_decimal(amount: f64) -> Option<Self> {
        if !amount.is_finite() {
            return None;
        }
        let minor = (amount * Self::MINOR_PER_MAJOR as f64).round();
        if minor < i64::MIN as f64 || minor >= i64::MAX as f64 {
            return None;
        }
        Some(Self(minor as i64))
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn to_display(self) -> f64 {
        self.0 as f64 / Self::MINOR_PER_MAJOR as f64
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = Self::MINOR_PER_MAJOR as u64;
        write!(f, "{}{}.{:02}", sign, abs / per, abs % per)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_and_minor() {
        let m = Money::from_major(1000);
        assert_eq!(m.minor(), 100_000);
        assert_eq!(m.to_display(), 1000.0);
        assert_eq!(Money::from_minor(1050).to_string(), "10.50");
    }

    #[test]
    fn test_from_decimal_rounds_to_paisa() {
        assert_eq!(Money::from_decimal(100.506), Some(Money::from_minor(10051)));
        assert_eq!(Money::from_decimal(0.1 + 0.2), Some(Money::from_minor(30)));
        assert_eq!(Money::from_decimal(f64::NAN), None);
        assert_eq!(Money::from_decimal(f64::INFINITY), None);
        assert_eq!(Money::from_decimal(1e300), None);
    }

    #[test]
    fn test_negative_display() {
        assert_eq!(Money::from_minor(-5).to_string(), "-0.05");
        assert_eq!(Money::from_major(-250).to_string(), "-250.00");
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Money::from_major(10);
        let b = Money::from_major(25);
        assert_eq!(a.checked_sub(b), Some(Money::from_major(-15)));
        assert_eq!(a.checked_add(b), Some(Money::from_major(35)));
        assert_eq!(Money::from_minor(i64::MAX).checked_add(a), None);
    }

    #[test]
    fn test_repeated_operations_do_not_drift() {
        let step = Money::from_decimal(0.1).unwrap();
        let mut total = Money::ZERO;
        for _ in 0..1000 {
            total = total.checked_add(step).unwrap();
        }
        assert_eq!(total, Money::from_major(100));
    }
}
