//! OHLCV candle type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ModelError;

/// A closed OHLCV candle.
///
/// Produced by the market data feed and never mutated afterwards. All prices
/// are strictly positive and `high >= low`; construction through
/// [`Candle::new`] enforces this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time of the candle period
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Build a validated candle.
    pub fn new(
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, ModelError> {
        for (field, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
            if value <= 0.0 {
                return Err(ModelError::NonPositivePrice { field, value });
            }
        }
        if high < low {
            return Err(ModelError::HighBelowLow { high, low });
        }
        if volume < 0.0 {
            return Err(ModelError::NegativeVolume(volume));
        }
        Ok(Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    /// Ratio of the candle body to its full range, in `[0, 1]`.
    ///
    /// Zero-range candles (doji with `high == low`) yield 0.
    pub fn body_ratio(&self) -> f64 {
        let range = self.high - self.low;
        if range == 0.0 {
            return 0.0;
        }
        (self.close - self.open).abs() / range
    }

    /// True when the candle closed above its open.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// True when the candle closed below its open.
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}
