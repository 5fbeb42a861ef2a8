//! Tick Math - price to tick conversion and range snapping
//!
//! Concentrated-liquidity pools partition the price curve into ticks of
//! fixed relative width: tick t sits at price 1.0001^t. Positions may only
//! use ticks that are multiples of the pool's tick spacing, so every range
//! we build has to land on that grid - and always by widening the range
//! outward, never by shrinking it inside the caller's request.

use thiserror::Error;
use tracing::trace;

// ============================================
// CONSTANTS
// ============================================

/// Protocol-wide minimum tick (price ~ 2^-128)
pub const MIN_TICK: i32 = -887272;

/// Protocol-wide maximum tick (price ~ 2^128)
pub const MAX_TICK: i32 = 887272;

/// ln(1.0001), the log base of the tick curve
const LN_TICK_BASE: f64 = 0.000099995000333308335;

// ============================================
// ERRORS
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TickError {
    /// Non-positive tick spacing, a non-finite price, or bounds that fall
    /// outside the protocol's global tick limits
    #[error("invalid tick range (spacing {spacing}, lower {lower}, upper {upper})")]
    InvalidRange {
        spacing: i32,
        lower: i32,
        upper: i32,
    },
}

fn invalid(spacing: i32, lower: i32, upper: i32) -> TickError {
    TickError::InvalidRange {
        spacing,
        lower,
        upper,
    }
}

// ============================================
// CONVERSIONS
// ============================================

/// Convert a decimal price into its tick index, snapped down onto the
/// spacing grid (lower-bound convention):
///
/// tick = floor(ln(price) / ln(1.0001))
pub fn price_to_tick(price: f64, tick_spacing: i32) -> Result<i32, TickError> {
    if tick_spacing <= 0 {
        return Err(invalid(tick_spacing, 0, 0));
    }
    if !price.is_finite() || price <= 0.0 {
        return Err(invalid(tick_spacing, 0, 0));
    }

    let raw = (price.ln() / LN_TICK_BASE).floor() as i64;
    if raw < MIN_TICK as i64 || raw > MAX_TICK as i64 {
        return Err(invalid(tick_spacing, raw as i32, raw as i32));
    }

    let tick = snap_down(raw as i32, tick_spacing);
    trace!(price, raw, tick, "price converted to tick");
    Ok(tick)
}

/// Build a spacing-aligned tick range around a center tick, at least
/// `width` ticks wide on each side. Bounds snap outward onto the grid:
/// the lower bound moves down, the upper bound moves up, never the
/// reverse, so the requested span always sits inside the result.
pub fn range_around(
    center_tick: i32,
    width: i32,
    tick_spacing: i32,
) -> Result<(i32, i32), TickError> {
    if tick_spacing <= 0 || width < 0 {
        return Err(invalid(tick_spacing, center_tick, center_tick));
    }

    // Truncating division plus one spacing outward on each side keeps the
    // bounds on the grid and at least `width` away from the center
    let lower = (center_tick.saturating_sub(width) / tick_spacing - 1) * tick_spacing;
    let upper = (center_tick.saturating_add(width) / tick_spacing + 1) * tick_spacing;

    if lower < MIN_TICK || upper > MAX_TICK {
        return Err(invalid(tick_spacing, lower, upper));
    }

    debug_assert!(lower <= center_tick && center_tick <= upper);
    trace!(center_tick, width, tick_spacing, lower, upper, "tick range snapped");
    Ok((lower, upper))
}

/// Convert a decimal price range into tick bounds: the lower price floors
/// onto the grid, the upper price ceils, guaranteeing both prices sit
/// inside the returned range.
pub fn price_range_to_ticks(
    price_lower: f64,
    price_upper: f64,
    tick_spacing: i32,
) -> Result<(i32, i32), TickError> {
    if tick_spacing <= 0 {
        return Err(invalid(tick_spacing, 0, 0));
    }
    if !price_lower.is_finite() || !price_upper.is_finite() {
        return Err(invalid(tick_spacing, 0, 0));
    }
    if price_lower <= 0.0 || price_upper <= price_lower {
        return Err(invalid(tick_spacing, 0, 0));
    }

    let raw_lower = (price_lower.ln() / LN_TICK_BASE).floor() as i32;
    let raw_upper = (price_upper.ln() / LN_TICK_BASE).ceil() as i32;

    let lower = snap_down(raw_lower, tick_spacing);
    let upper = snap_up(raw_upper, tick_spacing);

    if lower < MIN_TICK || upper > MAX_TICK {
        return Err(invalid(tick_spacing, lower, upper));
    }

    Ok((lower, upper))
}

// ============================================
// GRID SNAPPING
// ============================================

/// Nearest spacing multiple at or below `tick`
fn snap_down(tick: i32, spacing: i32) -> i32 {
    tick.div_euclid(spacing) * spacing
}

/// Nearest spacing multiple at or above `tick`
fn snap_up(tick: i32, spacing: i32) -> i32 {
    let snapped = tick.div_euclid(spacing) * spacing;
    if snapped == tick {
        snapped
    } else {
        snapped + spacing
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_range_for_weth_mor_pool() {
        // Pool observed at tick -69082 with 0.3% fee (spacing 60)
        let (lower, upper) = range_around(-69082, 3000, 60).unwrap();
        assert_eq!(lower, -72120);
        assert_eq!(upper, -66000);
    }

    #[test]
    fn range_bounds_are_on_grid_and_contain_center() {
        for &(center, width, spacing) in &[
            (-69082, 3000, 60),
            (0, 100, 10),
            (12345, 500, 200),
            (-1, 0, 60),
            (887000, 0, 200),
        ] {
            let (lower, upper) = range_around(center, width, spacing).unwrap();
            assert_eq!(lower % spacing, 0, "lower off grid for {:?}", (center, width, spacing));
            assert_eq!(upper % spacing, 0, "upper off grid for {:?}", (center, width, spacing));
            assert!(lower <= center && center <= upper);
            assert!(center - lower >= width);
            assert!(upper - center >= width);
        }
    }

    #[test]
    fn zero_spacing_is_rejected() {
        assert!(range_around(0, 100, 0).is_err());
        assert!(range_around(0, 100, -60).is_err());
        assert!(price_to_tick(1.0, 0).is_err());
    }

    #[test]
    fn range_past_protocol_bounds_is_rejected() {
        assert!(range_around(887200, 3000, 60).is_err());
        assert!(range_around(-887200, 3000, 60).is_err());
    }

    #[test]
    fn price_one_maps_to_tick_zero() {
        assert_eq!(price_to_tick(1.0, 60).unwrap(), 0);
    }

    #[test]
    fn price_to_tick_floors_onto_grid() {
        // 1.0001^100.5 lands inside tick 100, which snaps down to 60 on
        // spacing 60 and stays 100 on spacing 10
        let price = 1.0001f64.powf(100.5);
        assert_eq!(price_to_tick(price, 60).unwrap(), 60);
        assert_eq!(price_to_tick(price, 10).unwrap(), 100);
    }

    #[test]
    fn price_to_tick_contained_by_range_around() {
        for &price in &[0.001, 0.5, 1.0, 42.0, 1000.0] {
            for &spacing in &[10, 60, 200] {
                let tick = price_to_tick(price, spacing).unwrap();
                let (lower, upper) = range_around(tick, 5 * spacing, spacing).unwrap();
                assert!(lower <= tick && tick <= upper);
            }
        }
    }

    #[test]
    fn negative_price_tick_is_negative() {
        // price 0.001 -> ln(0.001)/ln(1.0001) ~ -69081.3, floored
        let tick = price_to_tick(0.001, 1).unwrap();
        assert_eq!(tick, -69082);
    }

    #[test]
    fn invalid_prices_are_rejected() {
        assert!(price_to_tick(0.0, 60).is_err());
        assert!(price_to_tick(-1.0, 60).is_err());
        assert!(price_to_tick(f64::NAN, 60).is_err());
    }

    #[test]
    fn price_range_rounds_outward_only() {
        let (lower, upper) = price_range_to_ticks(0.5, 2.0, 60).unwrap();
        // ln(0.5)/ln(1.0001) ~ -6932.0, ln(2)/ln(1.0001) ~ 6931.8
        assert!(lower <= -6932);
        assert!(upper >= 6932);
        assert_eq!(lower % 60, 0);
        assert_eq!(upper % 60, 0);
    }

    #[test]
    fn inverted_price_range_is_rejected() {
        assert!(price_range_to_ticks(2.0, 0.5, 60).is_err());
        assert!(price_range_to_ticks(1.0, 1.0, 60).is_err());
    }
}
