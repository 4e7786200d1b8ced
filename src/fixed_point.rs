//! Exact X96 fixed-point encoding of strategy bounds and thresholds.
//!
//! Both encodings carry 20 fractional bits of precision and are then shifted
//! into the X96 scale: `round_half_up(x * 2^20) * 2^76`. All arithmetic is
//! exact integer arithmetic on [`U256`], so the same rational input always
//! yields the same word.

use std::fmt::{self, Display};
use std::str::FromStr;

use alloy::primitives::U256;
use rust_decimal::Decimal;
use serde::Deserialize;

const PRECISION_BITS: usize = 20;
const X96_REMAINDER_BITS: usize = 76;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RatioError {
    #[error("invalid ratio {0:?}; expected a decimal like 1.1 or a fraction like 1/3000")]
    Invalid(String),
    #[error("ratio must be positive, got {0}")]
    NotPositive(String),
    #[error("ratio denominator is zero")]
    ZeroDenominator,
    #[error("fixed-point encoding of {0} overflows uint256")]
    Overflow(Ratio),
}

/// Positive rational number `num / den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Ratio {
    num: U256,
    den: U256,
}

impl Ratio {
    pub fn new(num: U256, den: U256) -> Result<Self, RatioError> {
        if den.is_zero() {
            return Err(RatioError::ZeroDenominator);
        }
        if num.is_zero() {
            return Err(RatioError::NotPositive(format!("{num}/{den}")));
        }
        Ok(Self { num, den })
    }

    pub const fn num(&self) -> U256 {
        self.num
    }

    pub const fn den(&self) -> U256 {
        self.den
    }

    /// `mantissa / 10^scale`, i.e. the exact value of a decimal.
    fn decimal_parts(decimal: Decimal) -> Result<(U256, U256), RatioError> {
        if decimal <= Decimal::ZERO {
            return Err(RatioError::NotPositive(decimal.to_string()));
        }

        let mantissa = u128::try_from(decimal.mantissa())
            .map_err(|_| RatioError::NotPositive(decimal.to_string()))?;
        let scale = U256::from(10u8).pow(U256::from(decimal.scale()));

        Ok((U256::from(mantissa), scale))
    }
}

impl TryFrom<Decimal> for Ratio {
    type Error = RatioError;

    fn try_from(decimal: Decimal) -> Result<Self, Self::Error> {
        let (num, den) = Self::decimal_parts(decimal)?;
        Self::new(num, den)
    }
}

impl FromStr for Ratio {
    type Err = RatioError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            Decimal::from_str(part.trim()).map_err(|_| RatioError::Invalid(text.to_owned()))
        };

        let Some((numerator, denominator)) = text.split_once('/') else {
            return Self::try_from(parse(text)?);
        };

        let denominator = parse(denominator)?;
        if denominator.is_zero() {
            return Err(RatioError::ZeroDenominator);
        }

        // (a / 10^i) / (b / 10^j) = (a * 10^j) / (b * 10^i)
        let (a, a_scale) = Self::decimal_parts(parse(numerator)?)?;
        let (b, b_scale) = Self::decimal_parts(denominator)?;
        let overflow = || RatioError::Invalid(text.to_owned());

        Self::new(
            a.checked_mul(b_scale).ok_or_else(overflow)?,
            b.checked_mul(a_scale).ok_or_else(overflow)?,
        )
    }
}

impl TryFrom<String> for Ratio {
    type Error = RatioError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Encodes `sqrt(price) * 10^decimal_shift` as an X96 word.
///
/// `decimal_shift` compensates for differing token decimals; the square
/// root of `10^(2 * shift)` is applied exactly.
pub fn encode_sqrt_bound(price: Ratio, decimal_shift: u32) -> Result<U256, RatioError> {
    let overflow = || RatioError::Overflow(price);

    // round_half_up(sqrt(n / d)) is the largest m with (2m - 1)^2 <= floor(4n / d).
    let shift = U256::from(10u8)
        .checked_pow(U256::from(decimal_shift) * U256::from(2u8))
        .ok_or_else(overflow)?;
    let scaled = price
        .num
        .checked_mul(shift)
        .and_then(|value| value.checked_shl(2 * PRECISION_BITS + 2))
        .ok_or_else(overflow)?;

    let root = isqrt(scaled / price.den);
    let mantissa = if root.is_zero() {
        U256::ZERO
    } else {
        let odd = if root.bit(0) { root } else { root - U256::from(1u8) };
        (odd + U256::from(1u8)) >> 1
    };

    to_x96(mantissa).ok_or_else(overflow)
}

/// Encodes a rebalance threshold ratio (e.g. `1.1` for 10%) as an X96 word.
pub fn encode_threshold(ratio: Ratio) -> Result<U256, RatioError> {
    let overflow = || RatioError::Overflow(ratio);

    // floor((2 * p * 2^20 + q) / (2 * q))
    let doubled = ratio
        .num
        .checked_shl(PRECISION_BITS + 1)
        .and_then(|value| value.checked_add(ratio.den))
        .ok_or_else(overflow)?;
    let divisor = ratio.den.checked_shl(1).ok_or_else(overflow)?;

    to_x96(doubled / divisor).ok_or_else(overflow)
}

fn to_x96(mantissa: U256) -> Option<U256> {
    mantissa.checked_shl(X96_REMAINDER_BITS)
}

/// Floor of the square root.
fn isqrt(value: U256) -> U256 {
    if value < U256::from(2u8) {
        return value;
    }

    let mut current = U256::from(1u8) << value.bit_len().div_ceil(2);
    loop {
        let next = (current + value / current) >> 1;
        if next >= current {
            return current;
        }
        current = next;
    }
}
