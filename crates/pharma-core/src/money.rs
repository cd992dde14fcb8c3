//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PRICES ARE STORED IN FILS                                              │
//! │                                                                         │
//! │  The storefront trades in Bahraini dinar (BHD), which has THREE        │
//! │  decimal places: 1 BHD = 1000 fils.                                    │
//! │                                                                         │
//! │    2.350 BHD  →  2350 fils                                             │
//! │    delivery fee (1 BHD) → 1000 fils                                    │
//! │                                                                         │
//! │  Order totals are sums of integer fils, so a subtotal recomputed on    │
//! │  the server always matches the sum of its lines exactly.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use pharma_core::money::Money;
//!
//! let price = Money::from_fils(2350); // BHD 2.350
//! let line = price * 2;               // BHD 4.700
//! assert_eq!(line.fils(), 4700);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

/// Minor units per major currency unit.
pub const FILS_PER_DINAR: i64 = 1000;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in fils (the smallest BHD unit).
///
/// ## Where Money is Used
/// ```text
/// Product.price_fils ──► cart line total ──► order subtotal
///                                               │
///                          delivery fee ────────┤
///                                               ▼
///                                         Order.total_fils ──► Payment.amount
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from fils.
    ///
    /// ## Example
    /// ```rust
    /// use pharma_core::money::Money;
    ///
    /// let price = Money::from_fils(1500);
    /// assert_eq!(price.fils(), 1500);
    /// ```
    #[inline]
    pub const fn from_fils(fils: i64) -> Self {
        Money(fils)
    }

    /// Creates a Money value from whole dinars.
    #[inline]
    pub const fn from_dinars(dinars: i64) -> Self {
        Money(dinars * FILS_PER_DINAR)
    }

    /// Returns the value in fils.
    #[inline]
    pub const fn fils(&self) -> i64 {
        self.0
    }

    /// Returns the whole-dinar portion.
    #[inline]
    pub const fn dinars(&self) -> i64 {
        self.0 / FILS_PER_DINAR
    }

    /// Returns the fils portion (always 0-999).
    #[inline]
    pub const fn fils_part(&self) -> i64 {
        (self.0 % FILS_PER_DINAR).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies a unit price by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use pharma_core::money::Money;
    ///
    /// let unit_price = Money::from_fils(1250);
    /// assert_eq!(unit_price.multiply_quantity(3).fils(), 3750);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-friendly display, e.g. `BHD 2.350`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{}BHD {}.{:03}",
            sign,
            self.dinars().abs(),
            self.fils_part()
        )
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fils() {
        let money = Money::from_fils(2350);
        assert_eq!(money.fils(), 2350);
        assert_eq!(money.dinars(), 2);
        assert_eq!(money.fils_part(), 350);
    }

    #[test]
    fn test_from_dinars() {
        assert_eq!(Money::from_dinars(1).fils(), 1000);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_fils(2350)), "BHD 2.350");
        assert_eq!(format!("{}", Money::from_fils(5)), "BHD 0.005");
        assert_eq!(format!("{}", Money::from_fils(-1500)), "-BHD 1.500");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_fils(1000);
        let b = Money::from_fils(250);

        assert_eq!((a + b).fils(), 1250);
        assert_eq!((a - b).fils(), 750);
        assert_eq!((a * 3).fils(), 3000);
    }

    #[test]
    fn test_sum() {
        let total: Money = [100, 200, 300].into_iter().map(Money::from_fils).sum();
        assert_eq!(total.fils(), 600);
    }
}
