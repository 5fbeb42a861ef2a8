//! Fixed-Point Price Conversions
//!
//! Uniswap V3 pools store price as sqrtPriceX96: the square root of the
//! token1/token0 ratio, scaled by 2^96 into a 160-bit unsigned integer.
//! This module converts between that representation and a decimal price.
//!
//! Squaring a 160-bit value needs up to 320 bits, so all intermediate
//! arithmetic runs in U512. Floating point enters only at the very last
//! conversion step.

use alloy_primitives::{U256, U512};
use thiserror::Error;

// ============================================
// CONSTANTS
// ============================================

/// sqrtPriceX96 is declared uint160 on-chain
const SQRT_PRICE_BITS: usize = 160;

/// The X96 fixed-point scale (2^96)
const X96_SHIFT: usize = 96;

/// Token decimals beyond this produce scale factors that no longer fit
/// the U512 intermediates
const MAX_DECIMALS: u8 = 36;

// ============================================
// ERRORS
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PriceError {
    /// sqrtPriceX96 == 0 means the pool was never initialized. A valid
    /// pool can never trade at price zero, so this is its own case.
    #[error("pool is uninitialized (sqrtPriceX96 == 0)")]
    UninitializedPool,

    /// Input or result falls outside the representable price range
    #[error("price is outside the representable range")]
    OutOfRange,
}

// ============================================
// CONVERSIONS
// ============================================

/// Convert a pool's sqrtPriceX96 into a decimal price of token1 per token0,
/// adjusted for token decimals:
///
/// price = sqrtPriceX96^2 / 2^192 * 10^(decimals0 - decimals1)
///
/// The numerator and denominator are built exactly in U512 and reduced to
/// f64 only at the end.
pub fn to_decimal_price(
    sqrt_price_x96: U256,
    decimals0: u8,
    decimals1: u8,
) -> Result<f64, PriceError> {
    if sqrt_price_x96.is_zero() {
        return Err(PriceError::UninitializedPool);
    }
    if sqrt_price_x96.bit_len() > SQRT_PRICE_BITS {
        return Err(PriceError::OutOfRange);
    }
    if decimals0 > MAX_DECIMALS || decimals1 > MAX_DECIMALS {
        return Err(PriceError::OutOfRange);
    }

    let sqrt_wide = widen(sqrt_price_x96);

    // price = (sqrt^2 * 10^d0) / (2^192 * 10^d1), kept as an exact ratio
    let numerator = sqrt_wide * sqrt_wide * pow10(decimals0);
    let denominator = (U512::from(1u8) << (2 * X96_SHIFT)) * pow10(decimals1);

    let price = u512_to_f64(numerator) / u512_to_f64(denominator);
    if !price.is_finite() || price <= 0.0 {
        return Err(PriceError::OutOfRange);
    }

    Ok(price)
}

/// Inverse of [`to_decimal_price`]: build the sqrtPriceX96 a pool must be
/// initialized with to trade at `price` (token1 per token0).
pub fn from_decimal_price(price: f64, decimals0: u8, decimals1: u8) -> Result<U256, PriceError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(PriceError::OutOfRange);
    }
    if decimals0 > MAX_DECIMALS || decimals1 > MAX_DECIMALS {
        return Err(PriceError::OutOfRange);
    }

    // Undo the decimal adjustment before taking the square root
    let raw_ratio = price * 10f64.powi(decimals1 as i32 - decimals0 as i32);
    let sqrt_ratio = raw_ratio.sqrt();
    let scaled = sqrt_ratio * 2f64.powi(X96_SHIFT as i32);

    let sqrt_price_x96 = f64_to_u256(scaled).ok_or(PriceError::OutOfRange)?;
    if sqrt_price_x96.is_zero() || sqrt_price_x96.bit_len() > SQRT_PRICE_BITS {
        return Err(PriceError::OutOfRange);
    }

    Ok(sqrt_price_x96)
}

// ============================================
// HELPERS
// ============================================

fn widen(value: U256) -> U512 {
    U512::from_be_slice(&value.to_be_bytes::<32>())
}

fn pow10(exp: u8) -> U512 {
    U512::from(10u8).pow(U512::from(exp))
}

/// Reduce a U512 to f64 by walking its 64-bit limbs. Exact up to f64's
/// 53-bit mantissa; this is the single rounding point of the pipeline.
fn u512_to_f64(value: U512) -> f64 {
    let mut result = 0.0f64;
    for (i, limb) in value.as_limbs().iter().enumerate() {
        if *limb != 0 {
            result += (*limb as f64) * 2f64.powi(64 * i as i32);
        }
    }
    result
}

/// Exact f64 -> U256 conversion via mantissa/exponent decomposition.
/// Fractional bits are truncated. Returns None for non-finite, negative,
/// or overflowing inputs.
fn f64_to_u256(value: f64) -> Option<U256> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value == 0.0 {
        return Some(U256::ZERO);
    }

    let bits = value.to_bits();
    let raw_exponent = ((bits >> 52) & 0x7ff) as i64;
    let fraction = bits & ((1u64 << 52) - 1);

    // Subnormals have an implicit leading 0 instead of 1
    let (mantissa, exponent) = if raw_exponent == 0 {
        (fraction, -1074i64)
    } else {
        (fraction | (1u64 << 52), raw_exponent - 1075)
    };

    let wide = U256::from(mantissa);
    if exponent >= 0 {
        let shift = exponent as usize;
        if shift + 53 > 256 {
            return None;
        }
        Some(wide << shift)
    } else {
        let shift = (-exponent) as usize;
        if shift >= 256 {
            return Some(U256::ZERO);
        }
        Some(wide >> shift)
    }
}

// ============================================
// TESTS
// ============================================
