//! Liquidity Planning - tick ranges and paired amounts for minting
//!
//! Turns "provide this much token0 around the current price" into the
//! concrete parameters a position mint needs: a spacing-aligned tick range
//! centered on the pool's tick, plus the paired token1 amount. Both
//! amounts are desired maxima - the pool decides how much of each side it
//! actually consumes, which may be less for either.

use alloy_primitives::U256;
use thiserror::Error;
use tracing::debug;

use crate::chain::PoolState;
use crate::ticks::{self, TickError};

/// Fixed-point scale for the token0/token1 price ratio (18 decimals)
const RATIO_SCALE: u128 = 1_000_000_000_000_000_000;

// ============================================
// TYPES
// ============================================

/// Parameters for one liquidity-provision transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityPlan {
    pub tick_lower: i32,
    pub tick_upper: i32,
    /// Maximum token0 to supply
    pub amount0: U256,
    /// Maximum token1 to supply
    pub amount1: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum LiquidityError {
    /// The pool exists but slot0 holds no price yet. The caller has to
    /// initialize the pool first - no parameter change can fix this.
    #[error("pool is not initialized (sqrtPriceX96 == 0)")]
    PoolNotInitialized,

    /// Non-finite or negative price ratio
    #[error("price ratio {0} is not usable")]
    InvalidRatio(f64),

    /// Zero token0 amount plans an empty position
    #[error("desired amount0 is zero")]
    ZeroAmount,

    /// amount0 * ratio exceeds the 256-bit amount space
    #[error("paired amount overflows")]
    AmountOverflow,

    #[error(transparent)]
    Ticks(#[from] TickError),
}

// ============================================
// PLANNING
// ============================================

/// Plan a position of `desired_amount0` token0 around the pool's current
/// tick, `range_width_ticks` wide on each side.
///
/// `price_ratio` is token1 per token0 in whole-token terms; the paired
/// amount is amount0 * ratio, computed in 18-decimal fixed point so large
/// raw amounts do not lose precision through f64.
pub fn plan(
    pool: &PoolState,
    desired_amount0: U256,
    price_ratio: f64,
    range_width_ticks: i32,
) -> Result<LiquidityPlan, LiquidityError> {
    if !pool.is_initialized() {
        return Err(LiquidityError::PoolNotInitialized);
    }
    if desired_amount0.is_zero() {
        return Err(LiquidityError::ZeroAmount);
    }
    if !price_ratio.is_finite() || price_ratio < 0.0 {
        return Err(LiquidityError::InvalidRatio(price_ratio));
    }

    let (tick_lower, tick_upper) =
        ticks::range_around(pool.tick, range_width_ticks, pool.tick_spacing)?;

    let amount1 = paired_amount(desired_amount0, price_ratio)?;

    debug!(
        tick_lower,
        tick_upper,
        %desired_amount0,
        %amount1,
        "liquidity plan built"
    );

    Ok(LiquidityPlan {
        tick_lower,
        tick_upper,
        amount0: desired_amount0,
        amount1,
    })
}

/// amount0 * ratio via 18-decimal fixed point: the ratio is scaled into an
/// integer once, then the whole product stays in U256.
fn paired_amount(amount0: U256, price_ratio: f64) -> Result<U256, LiquidityError> {
    let scaled_ratio = price_ratio * RATIO_SCALE as f64;
    if !scaled_ratio.is_finite() || scaled_ratio >= u128::MAX as f64 {
        return Err(LiquidityError::InvalidRatio(price_ratio));
    }

    let ratio_fixed = U256::from(scaled_ratio as u128);
    let product = amount0
        .checked_mul(ratio_fixed)
        .ok_or(LiquidityError::AmountOverflow)?;

    Ok(product / U256::from(RATIO_SCALE))
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn live_pool(tick: i32, tick_spacing: i32) -> PoolState {
        PoolState {
            sqrt_price_x96: U256::from(1u8) << 96,
            tick,
            liquidity: 1_000_000,
            tick_spacing,
        }
    }

    #[test]
    fn uninitialized_pool_is_its_own_error() {
        let pool = PoolState {
            sqrt_price_x96: U256::ZERO,
            tick: 0,
            liquidity: 0,
            tick_spacing: 60,
        };
        assert_eq!(
            plan(&pool, U256::from(100u8), 1.0, 3000),
            Err(LiquidityError::PoolNotInitialized)
        );
    }

    #[test]
    fn range_centers_on_pool_tick() {
        let pool = live_pool(-69082, 60);
        let result = plan(&pool, U256::from(1_000_000u32), 1000.0, 3000).unwrap();

        assert_eq!(result.tick_lower, -72120);
        assert_eq!(result.tick_upper, -66000);
        assert!(result.tick_lower <= pool.tick && pool.tick <= result.tick_upper);
    }

    #[test]
    fn paired_amount_scales_by_ratio() {
        let pool = live_pool(0, 60);
        let result = plan(&pool, U256::from(5u8), 1000.0, 600).unwrap();
        assert_eq!(result.amount0, U256::from(5u8));
        assert_eq!(result.amount1, U256::from(5000u16));
    }

    #[test]
    fn fractional_ratio_keeps_precision_on_large_amounts() {
        let pool = live_pool(0, 60);
        // 1e18 raw units at ratio 0.5 -> exactly 5e17
        let one_token = U256::from(RATIO_SCALE);
        let result = plan(&pool, one_token, 0.5, 600).unwrap();
        assert_eq!(result.amount1, U256::from(RATIO_SCALE / 2));
    }

    #[test]
    fn zero_ratio_plans_single_sided_position() {
        let pool = live_pool(0, 60);
        let result = plan(&pool, U256::from(100u8), 0.0, 600).unwrap();
        assert_eq!(result.amount1, U256::ZERO);
    }

    #[test]
    fn bad_inputs_are_rejected() {
        let pool = live_pool(0, 60);
        assert_eq!(
            plan(&pool, U256::ZERO, 1.0, 600),
            Err(LiquidityError::ZeroAmount)
        );
        assert!(matches!(
            plan(&pool, U256::from(100u8), f64::NAN, 600),
            Err(LiquidityError::InvalidRatio(_))
        ));
        assert_eq!(
            plan(&pool, U256::from(100u8), -1.0, 600),
            Err(LiquidityError::InvalidRatio(-1.0))
        );
    }

    #[test]
    fn tick_errors_propagate() {
        // Center near the protocol maximum forces the range out of bounds
        let pool = live_pool(887200, 60);
        assert!(matches!(
            plan(&pool, U256::from(100u8), 1.0, 3000),
            Err(LiquidityError::Ticks(TickError::InvalidRange { .. }))
        ));
    }

    #[test]
    fn overflow_is_reported_not_wrapped() {
        let pool = live_pool(0, 60);
        assert_eq!(
            plan(&pool, U256::MAX, 2.0, 600),
            Err(LiquidityError::AmountOverflow)
        );
    }
}
