//! ICT price patterns: Order Blocks and Fair Value Gaps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Direction of a detected pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Bullish => write!(f, "bullish"),
            Direction::Bearish => write!(f, "bearish"),
        }
    }
}

/// An Order Block: a candle range flagged as an institutional
/// support/resistance zone, based on a strong-bodied reversal candle.
///
/// Immutable except for `touches`, incremented each time price tests the
/// zone, and `valid`, which only the owning store transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    pub direction: Direction,
    pub top: f64,
    pub bottom: f64,
    pub detected_at: DateTime<Utc>,
    /// Number of times price has tested this zone
    #[serde(default)]
    pub touches: u32,
    /// Whether the zone is still tradeable
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

impl OrderBlock {
    /// Build a validated order block (`top > bottom > 0`).
    pub fn new(
        direction: Direction,
        top: f64,
        bottom: f64,
        detected_at: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        validate_range(top, bottom)?;
        Ok(Self {
            direction,
            top,
            bottom,
            detected_at,
            touches: 0,
            valid: true,
        })
    }

    /// True when `price` falls inside the zone, boundaries inclusive.
    pub fn contains(&self, price: f64) -> bool {
        price >= self.bottom && price <= self.top
    }
}

/// A Fair Value Gap: a three-candle price gap interpreted as an inefficiency
/// likely to be revisited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fvg {
    pub direction: Direction,
    pub top: f64,
    pub bottom: f64,
    pub detected_at: DateTime<Utc>,
    /// How much of the gap has been filled, in `[0, 100]`
    #[serde(default)]
    pub filled_percent: f64,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

impl Fvg {
    /// Build a validated gap (`top > bottom > 0`, fill within `[0, 100]`).
    pub fn new(
        direction: Direction,
        top: f64,
        bottom: f64,
        detected_at: DateTime<Utc>,
        filled_percent: f64,
    ) -> Result<Self, ModelError> {
        validate_range(top, bottom)?;
        if !(0.0..=100.0).contains(&filled_percent) {
            return Err(ModelError::FilledPercentRange(filled_percent));
        }
        Ok(Self {
            direction,
            top,
            bottom,
            detected_at,
            filled_percent,
            valid: true,
        })
    }

    /// True when `price` falls inside the gap, boundaries inclusive.
    pub fn contains(&self, price: f64) -> bool {
        price >= self.bottom && price <= self.top
    }
}

fn validate_range(top: f64, bottom: f64) -> Result<(), ModelError> {
    if bottom <= 0.0 {
        return Err(ModelError::NonPositivePrice {
            field: "bottom",
            value: bottom,
        });
    }
    if top <= bottom {
        return Err(ModelError::InvalidRange { top, bottom });
    }
    Ok(())
}
