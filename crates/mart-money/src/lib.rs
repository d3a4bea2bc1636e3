//! Fixed-point money type for loyalty balances.
//!
//! # Motivation
//!
//! Every monetary amount in this system is an integer count of minor currency
//! units (cents) stored as `i64`.  Using raw `i64` for money is error-prone:
//! it allows accidental arithmetic with unrelated integers (worker counts,
//! task ids, retry attempts) without any compile-time signal.
//!
//! `Money` wraps the raw `i64` so the type system prevents:
//! - Implicit construction from raw `i64` (no `From<i64>` impl).
//! - Mixing `Money` with unrelated `i64` values in arithmetic.
//!
//! # Scale
//!
//! 1 major unit = 100 minor units.  All balances, accruals, and withdrawal
//! amounts use this scale.
//!
//! # Wire format
//!
//! The accrual authority and the user-facing API exchange amounts as decimal
//! JSON numbers (`5.0` means 500 minor units).  Floating point exists **only**
//! at that boundary: [`Money::to_decimal`] on egress and
//! [`Money::try_from_decimal`] on ingress, which rounds to the nearest minor
//! unit and rejects non-finite or out-of-range input.  The round trip
//! minor units → decimal → minor units is exact for any amount within
//! ±2^51 minor units, far beyond any realistic balance.
//!
//! # Arithmetic
//!
//! - `Add`, `Sub`, `Neg`, `AddAssign`, `SubAssign` are implemented for
//!   `Money op Money`; these panic on overflow in debug builds and wrap in
//!   release (matching Rust's standard integer semantics).
//! - `checked_add` / `checked_sub` and `saturating_add` / `saturating_sub`
//!   are provided for callers that must handle overflow explicitly.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Money newtype
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount in minor currency units (cents).
///
/// 1 major unit = `Money::from_minor(100)`.
///
/// # Construction
///
/// Use [`Money::from_minor`] (or [`Money::from_major`]) for explicit
/// construction.  There is intentionally no `From<i64>` implementation —
/// callers must be deliberate about when a raw integer represents money.
///
/// # Retrieval
///
/// Use [`Money::minor`] to extract the underlying `i64` when crossing layer
/// boundaries (e.g. binding to a `BIGINT` database column).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

/// Minor units per major unit.
const MINOR_PER_MAJOR: i64 = 100;

/// Largest scaled magnitude accepted on ingress (2^53, the bound below which
/// every integer has an exact `f64` representation).
const MAX_SCALED: f64 = 9_007_199_254_740_992.0;

impl Money {
    /// Zero monetary amount.
    pub const ZERO: Money = Money(0);

    /// Maximum representable value.
    pub const MAX: Money = Money(i64::MAX);

    /// Minimum representable value.
    pub const MIN: Money = Money(i64::MIN);

    /// Construct a `Money` from a raw minor-unit count.
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// Construct a `Money` from whole major units (`from_major(5)` == 500
    /// minor units).
    #[inline]
    pub const fn from_major(major: i64) -> Self {
        Money(major * MINOR_PER_MAJOR)
    }

    /// Extract the underlying minor-unit count.
    #[inline]
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Checked addition — `None` on overflow.
    #[inline]
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Checked subtraction — `None` on underflow.
    #[inline]
    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Saturating addition — clamps at [`Money::MAX`] on overflow.
    #[inline]
    pub fn saturating_add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction — clamps at [`Money::MIN`] on underflow.
    #[inline]
    pub fn saturating_sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }

    /// `true` if this amount is non-negative.
    #[inline]
    pub fn is_non_negative(self) -> bool {
        self.0 >= 0
    }

    /// `true` if this amount is strictly negative.
    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `true` if this amount is strictly positive.
    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Decimal (major-unit) representation for the external JSON boundary.
    ///
    /// Exact for amounts within ±2^53 minor units.
    #[inline]
    pub fn to_decimal(self) -> f64 {
        self.0 as f64 / MINOR_PER_MAJOR as f64
    }

    /// Parse a decimal (major-unit) number from the external JSON boundary
    /// into minor units, rounding to the nearest minor unit (ties away from
    /// zero).
    ///
    /// Rejects non-finite values and magnitudes beyond 2^53 minor units.
    pub fn try_from_decimal(value: f64) -> Result<Money, DecimalMoneyError> {
        if !value.is_finite() {
            return Err(DecimalMoneyError::NotFinite);
        }
        let scaled = (value * MINOR_PER_MAJOR as f64).round();
        if scaled.abs() > MAX_SCALED {
            return Err(DecimalMoneyError::OutOfRange);
        }
        Ok(Money(scaled as i64))
    }
}

// ---------------------------------------------------------------------------
// Ingress conversion error
// ---------------------------------------------------------------------------

/// Errors from [`Money::try_from_decimal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalMoneyError {
    /// The input was NaN or infinite.
    NotFinite,
    /// The input magnitude exceeds what minor units can represent exactly.
    OutOfRange,
}

impl std::fmt::Display for DecimalMoneyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecimalMoneyError::NotFinite => write!(f, "monetary amount is not finite"),
            DecimalMoneyError::OutOfRange => write!(f, "monetary amount out of range"),
        }
    }
}

impl std::error::Error for DecimalMoneyError {}

// ---------------------------------------------------------------------------
// Arithmetic operators (closed over Money)
// ---------------------------------------------------------------------------

impl Add for Money {
    type Output = Money;
    #[inline]
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    #[inline]
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;
    #[inline]
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let major = self.0 / MINOR_PER_MAJOR;
        let frac = (self.0 % MINOR_PER_MAJOR).abs();
        // When |value| < 1 major unit and negative, major truncates to 0,
        // losing the sign.  Emit "-0" explicitly in that case.
        if self.0 < 0 && major == 0 {
            write!(f, "-{major}.{frac:02}")
        } else {
            write!(f, "{major}.{frac:02}")
        }
    }
}

// ---------------------------------------------------------------------------
// Serde — decimal JSON number at the wire boundary
// ---------------------------------------------------------------------------

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Money::try_from_decimal(value).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
