//! ICT pattern detection over candle windows
//!
//! Pure functions: each takes the candle window it needs plus the pattern
//! config and returns an optional detection. `None` is the common case, not
//! an error.

use types::{Candle, Direction, Fvg, OrderBlock};

use crate::config::PatternConfig;

/// Detect an Order Block from the last two candles.
///
/// The most recent candle must be a displacement candle (body ratio above
/// `min_body_ratio`) reversing the prior candle's direction. The zone spans
/// the prior candle's full range and carries the displacement direction.
pub fn detect_order_block(prev: &Candle, last: &Candle, cfg: &PatternConfig) -> Option<OrderBlock> {
    if last.body_ratio() <= cfg.min_body_ratio {
        return None;
    }
    let direction = if last.is_bullish() && prev.is_bearish() {
        Direction::Bullish
    } else if last.is_bearish() && prev.is_bullish() {
        Direction::Bearish
    } else {
        return None;
    };
    // prev is a validated candle, so high > low holds and new() cannot fail
    // unless the range is degenerate; treat that as no detection.
    OrderBlock::new(direction, prev.high, prev.low, last.open_time).ok()
}

/// Detect a Fair Value Gap from a three-candle window.
///
/// Bullish when the first candle's high never overlaps the third's low,
/// bearish for the mirror case. The gap must exceed `min_gap_percent` of its
/// own midpoint price to filter out noise on large-priced instruments.
pub fn detect_fvg(c1: &Candle, c2: &Candle, c3: &Candle, cfg: &PatternConfig) -> Option<Fvg> {
    let (direction, bottom, top) = if c1.high < c3.low {
        (Direction::Bullish, c1.high, c3.low)
    } else if c1.low > c3.high {
        (Direction::Bearish, c3.high, c1.low)
    } else {
        return None;
    };
    let gap = top - bottom;
    let midpoint = (top + bottom) / 2.0;
    let gap_percent = gap / midpoint * 100.0;
    if gap_percent <= cfg.min_gap_percent {
        return None;
    }
    Fvg::new(direction, top, bottom, c2.open_time, 0.0).ok()
}
