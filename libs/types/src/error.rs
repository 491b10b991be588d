//! Validation errors for domain model construction

use thiserror::Error;

/// Errors raised when a domain entity fails invariant validation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Price boundary ordering violated (top must exceed bottom)
    #[error("invalid price range: top {top} must be greater than bottom {bottom}")]
    InvalidRange { top: f64, bottom: f64 },

    /// A price field that must be strictly positive was not
    #[error("invalid {field} price: {value} (must be > 0)")]
    NonPositivePrice { field: &'static str, value: f64 },

    /// Candle high below low
    #[error("invalid candle: high {high} is below low {low}")]
    HighBelowLow { high: f64, low: f64 },

    /// Negative volume on a candle
    #[error("invalid candle volume: {0}")]
    NegativeVolume(f64),

    /// Position size must be strictly positive
    #[error("invalid position size: {0}")]
    NonPositiveSize(f64),

    /// Stop loss on the wrong side of the entry price
    #[error("{side} position stop loss {stop_loss} is on the wrong side of entry {entry}")]
    StopLossSide {
        side: &'static str,
        stop_loss: f64,
        entry: f64,
    },

    /// Take profit on the wrong side of the entry price
    #[error("{side} position take profit {take_profit} is on the wrong side of entry {entry}")]
    TakeProfitSide {
        side: &'static str,
        take_profit: f64,
        entry: f64,
    },

    /// FVG fill percentage outside [0, 100]
    #[error("filled percent {0} is outside [0, 100]")]
    FilledPercentRange(f64),

    /// Empty or malformed trading symbol
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),
}
