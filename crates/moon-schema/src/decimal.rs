//! Exact fixed-scale decimal values.
//!
//! A `Decimal` is an arbitrary-precision integer of *units* plus a scale:
//! `units / 10^scale`. Arithmetic is exact, comparison is numeric, and the
//! canonical string form always carries exactly `scale` fractional digits,
//! so the same literal round-trips bit-identically through JSON and every
//! supported SQL dialect.
//!
//! Accepted input is a plain decimal literal: optional leading minus,
//! integer digits, optional point followed by at least one fractional
//! digit. Scientific notation, thousands separators, leading or trailing
//! points, and empty strings are rejected.

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use thiserror::Error;

/// Maximum fractional digits a decimal column may declare.
pub const MAX_DECIMAL_SCALE: u32 = 10;

/// Scale applied when a decimal field does not declare one.
pub const DEFAULT_DECIMAL_SCALE: u32 = 2;

/// Errors produced by decimal parsing and arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecimalError {
    #[error("invalid decimal literal '{0}'")]
    InvalidFormat(String),

    #[error("decimal scale {scale} exceeds maximum {max}")]
    ScaleExceeded { scale: u32, max: u32 },

    #[error("rescaling to {to} would lose precision")]
    PrecisionLoss { to: u32 },

    #[error("division by zero")]
    DivisionByZero,

    #[error("quotient is not representable at a finite scale")]
    NonTerminating,
}

impl From<DecimalError> for moon_common::MoonError {
    fn from(err: DecimalError) -> Self {
        moon_common::MoonError::Validation(err.to_string())
    }
}

/// Exact decimal: `units / 10^scale`.
#[derive(Debug, Clone)]
pub struct Decimal {
    units: BigInt,
    scale: u32,
}

fn pow10(n: u32) -> BigInt {
    num_traits::pow(BigInt::from(10), n as usize)
}

fn gcd(a: &BigInt, b: &BigInt) -> BigInt {
    let mut a = a.abs();
    let mut b = b.abs();
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    a
}

impl Decimal {
    /// Builds a decimal directly from units and scale.
    pub fn from_units(units: impl Into<BigInt>, scale: u32) -> Self {
        Self { units: units.into(), scale }
    }

    /// Zero at the given scale.
    pub fn zero(scale: u32) -> Self {
        Self { units: BigInt::zero(), scale }
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn units(&self) -> &BigInt {
        &self.units
    }

    pub fn is_zero(&self) -> bool {
        self.units.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.units.is_negative()
    }

    /// Parses a decimal literal, accepting at most `max_scale` fractional
    /// digits. The parsed value keeps the scale it was written with.
    pub fn parse(input: &str, max_scale: u32) -> Result<Self, DecimalError> {
        let invalid = || DecimalError::InvalidFormat(input.to_string());

        let bytes = input.as_bytes();
        if bytes.is_empty() {
            return Err(invalid());
        }

        let mut pos = 0;
        let negative = bytes[0] == b'-';
        if negative {
            pos = 1;
        }

        let int_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == int_start {
            return Err(invalid());
        }

        let mut frac_len: u32 = 0;
        let mut digits = input[int_start..pos].to_string();
        if pos < bytes.len() {
            if bytes[pos] != b'.' {
                return Err(invalid());
            }
            pos += 1;
            let frac_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == frac_start || pos != bytes.len() {
                return Err(invalid());
            }
            frac_len = (pos - frac_start) as u32;
            digits.push_str(&input[frac_start..pos]);
        }

        if frac_len > max_scale {
            return Err(DecimalError::ScaleExceeded { scale: frac_len, max: max_scale });
        }

        let mut units: BigInt = digits.parse().map_err(|_| invalid())?;
        if negative {
            units = -units;
        }
        Ok(Self { units, scale: frac_len })
    }

    /// Parses and normalizes to exactly `scale` fractional digits, the
    /// canonical form of a column value.
    pub fn parse_canonical(input: &str, scale: u32) -> Result<Self, DecimalError> {
        Self::parse(input, scale)?.rescale(scale)
    }

    /// Converts a driver float back to a decimal at the given scale. Used
    /// by the SQLite scanner when numeric affinity stored the value as
    /// REAL; the engine only does that when the conversion is reversible.
    pub fn from_f64(value: f64, scale: u32) -> Result<Self, DecimalError> {
        if !value.is_finite() {
            return Err(DecimalError::InvalidFormat(value.to_string()));
        }
        Self::parse(&format!("{:.*}", scale as usize, value), scale)
    }

    /// Changes the scale. Growing pads with zeros; shrinking requires the
    /// dropped digits to be zero.
    pub fn rescale(&self, to: u32) -> Result<Self, DecimalError> {
        match to.cmp(&self.scale) {
            Ordering::Equal => Ok(self.clone()),
            Ordering::Greater => Ok(Self {
                units: &self.units * pow10(to - self.scale),
                scale: to,
            }),
            Ordering::Less => {
                let divisor = pow10(self.scale - to);
                if (&self.units % &divisor).is_zero() {
                    Ok(Self { units: &self.units / divisor, scale: to })
                } else {
                    Err(DecimalError::PrecisionLoss { to })
                }
            }
        }
    }

    /// Exact addition at the wider of the two scales.
    pub fn add(&self, other: &Decimal) -> Decimal {
        let scale = self.scale.max(other.scale);
        let a = &self.units * pow10(scale - self.scale);
        let b = &other.units * pow10(scale - other.scale);
        Decimal { units: a + b, scale }
    }

    /// Exact subtraction at the wider of the two scales.
    pub fn sub(&self, other: &Decimal) -> Decimal {
        let scale = self.scale.max(other.scale);
        let a = &self.units * pow10(scale - self.scale);
        let b = &other.units * pow10(scale - other.scale);
        Decimal { units: a - b, scale }
    }

    /// Exact multiplication; the result scale is the sum of the operand
    /// scales.
    pub fn mul(&self, other: &Decimal) -> Decimal {
        Decimal {
            units: &self.units * &other.units,
            scale: self.scale + other.scale,
        }
    }

    /// Exact division. Errors on a zero divisor and on quotients that do
    /// not terminate in base ten.
    pub fn checked_div(&self, other: &Decimal) -> Result<Decimal, DecimalError> {
        if other.units.is_zero() {
            return Err(DecimalError::DivisionByZero);
        }

        // a/b == (ua * 10^sb) / (ub * 10^sa), reduced to lowest terms.
        let mut num = &self.units * pow10(other.scale);
        let mut den = &other.units * pow10(self.scale);
        if den.is_negative() {
            num = -num;
            den = -den;
        }
        let g = gcd(&num, &den);
        if !g.is_zero() {
            num = num / &g;
            den = den / &g;
        }

        // A reduced denominator of 2^x * 5^y terminates at scale max(x, y).
        let two = BigInt::from(2);
        let five = BigInt::from(5);
        let mut rest = den.clone();
        let mut x: u32 = 0;
        let mut y: u32 = 0;
        while (&rest % &two).is_zero() {
            rest = rest / &two;
            x += 1;
        }
        while (&rest % &five).is_zero() {
            rest = rest / &five;
            y += 1;
        }
        if !rest.is_one() {
            return Err(DecimalError::NonTerminating);
        }

        let scale = x.max(y);
        let units = num * pow10(scale) / den;
        Ok(Decimal { units, scale })
    }

    /// Three-way numeric comparison: -1, 0, or +1.
    pub fn compare(&self, other: &Decimal) -> i8 {
        match self.cmp_impl(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    fn cmp_impl(&self, other: &Decimal) -> Ordering {
        let scale = self.scale.max(other.scale);
        let a = &self.units * pow10(scale - self.scale);
        let b = &other.units * pow10(scale - other.scale);
        a.cmp(&b)
    }

    pub fn neg(&self) -> Decimal {
        Decimal { units: -&self.units, scale: self.scale }
    }

    pub fn abs(&self) -> Decimal {
        Decimal { units: self.units.abs(), scale: self.scale }
    }
}

impl std::fmt::Display for Decimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.units);
        }

        let mut digits = self.units.abs().to_string();
        let min_len = self.scale as usize + 1;
        if digits.len() < min_len {
            digits = format!("{}{}", "0".repeat(min_len - digits.len()), digits);
        }
        let split = digits.len() - self.scale as usize;
        let sign = if self.units.is_negative() { "-" } else { "" };
        write!(f, "{}{}.{}", sign, &digits[..split], &digits[split..])
    }
}

// Equality and ordering are numeric: 1.0 == 1.00.
impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_impl(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp_impl(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_impl(other)
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Decimal::parse(&s, MAX_DECIMAL_SCALE).map_err(de::Error::custom)
    }
}
