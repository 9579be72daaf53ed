//! Integer minor-unit money.
//!
//! Every currency field in the billing core is a [`Money`]. Sums and
//! differences are exact; the only place rounding happens is when a money
//! value is scaled by a decimal quantity ([`Money::times`]) or a percentage
//! ([`Money::percent`]), and that rounding is applied once per line.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Amount of money in minor units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(units: i64) -> Self {
        Money(units)
    }

    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `None` when the sum leaves the `i64` range.
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Clamped at the `i64` bounds; for running totals that are only reported.
    pub fn saturating_add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }

    /// Exact sum of `amounts`, or `None` on overflow.
    pub fn checked_sum<I>(amounts: I) -> Option<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, amount| acc.checked_add(amount))
    }

    /// Scale by a decimal quantity, rounding half away from zero to a whole
    /// minor unit. `None` on overflow.
    pub fn times(self, quantity: Decimal) -> Option<Money> {
        Decimal::from(self.0)
            .checked_mul(quantity)
            .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|v| v.to_i64())
            .map(Money)
    }

    /// `percentage` percent of this amount (11 means 11%), rounded like [`Money::times`].
    pub fn percent(self, percentage: Decimal) -> Option<Money> {
        percentage
            .checked_div(Decimal::ONE_HUNDRED)
            .and_then(|fraction| self.times(fraction))
    }

    /// Share of `total` as a percentage with two decimal places; zero when
    /// `total` is zero.
    pub fn share_of(self, total: Money) -> Decimal {
        if total.is_zero() {
            return Decimal::ZERO;
        }
        (Decimal::from(self.0) * Decimal::ONE_HUNDRED / Decimal::from(total.0))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn min(self, other: Money) -> Money {
        if self <= other {
            self
        } else {
            other
        }
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl From<i64> for Money {
    fn from(units: i64) -> Self {
        Money(units)
    }
}

/// Canonical display used by every UI collaborator: `Rp 260.000`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.0.unsigned_abs().to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(ch);
        }
        if self.0 < 0 {
            write!(f, "-Rp {}", grouped)
        } else {
            write!(f, "Rp {}", grouped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn formats_with_dot_grouping() {
        assert_eq!(Money::from_minor(0).to_string(), "Rp 0");
        assert_eq!(Money::from_minor(999).to_string(), "Rp 999");
        assert_eq!(Money::from_minor(1_000).to_string(), "Rp 1.000");
        assert_eq!(Money::from_minor(260_000).to_string(), "Rp 260.000");
        assert_eq!(Money::from_minor(1_234_567).to_string(), "Rp 1.234.567");
        assert_eq!(Money::from_minor(-160_000).to_string(), "-Rp 160.000");
    }

    #[test]
    fn times_rounds_half_away_from_zero() {
        let rate = Money::from_minor(5_000);
        assert_eq!(
            rate.times(Decimal::from(40)),
            Some(Money::from_minor(200_000))
        );

        let odd = Money::from_minor(3);
        assert_eq!(
            odd.times(Decimal::from_str("0.5").unwrap()),
            Some(Money::from_minor(2))
        );
        assert_eq!(
            odd.times(Decimal::from_str("0.1").unwrap()),
            Some(Money::from_minor(0))
        );
    }

    #[test]
    fn percent_of_amount() {
        let subtotal = Money::from_minor(260_000);
        assert_eq!(
            subtotal.percent(Decimal::from(11)),
            Some(Money::from_minor(28_600))
        );
        assert_eq!(subtotal.percent(Decimal::ZERO), Some(Money::ZERO));
    }

    #[test]
    fn share_of_zero_total_is_zero() {
        assert_eq!(Money::from_minor(10).share_of(Money::ZERO), Decimal::ZERO);
        assert_eq!(
            Money::from_minor(1).share_of(Money::from_minor(3)),
            Decimal::from_str("33.33").unwrap()
        );
    }

    #[test]
    fn sums_are_exact() {
        let parts = [
            Money::from_minor(50_000),
            Money::from_minor(10_000),
            Money::from_minor(200_000),
        ];
        let total: Money = parts.iter().sum();
        assert_eq!(total, Money::from_minor(260_000));
        assert_eq!(total - parts[0], Money::from_minor(210_000));
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        let max = Money::from_minor(i64::MAX);
        assert_eq!(max.checked_add(Money::from_minor(1)), None);
        assert_eq!(Money::from_minor(i64::MIN).checked_sub(Money::from_minor(1)), None);
        assert_eq!(Money::checked_sum([max, Money::from_minor(1)]), None);
        assert_eq!(max.saturating_add(Money::from_minor(1)), max);
        assert_eq!(
            Money::checked_sum([Money::from_minor(2), Money::from_minor(3)]),
            Some(Money::from_minor(5))
        );
    }
}
