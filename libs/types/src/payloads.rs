//! Typed event payloads.
//!
//! Every event on the bus carries a JSON object payload. These structs give
//! the processors a typed view of that object; they serialize to and from
//! `serde_json::Map` at the bus boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Candle, Fvg, ModelError, OrderBlock, Side};

/// Payload of a `CandleClosed` event, as published by the market data feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleClosed {
    pub symbol: String,
    pub interval: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Open time of the candle period
    pub timestamp: DateTime<Utc>,
}

impl CandleClosed {
    /// Validate and convert into a domain [`Candle`].
    pub fn to_candle(&self) -> Result<Candle, ModelError> {
        Candle::new(
            self.timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }

    pub fn from_candle(symbol: impl Into<String>, interval: impl Into<String>, c: &Candle) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            timestamp: c.open_time,
        }
    }
}

/// Payload of an `OrderBlockDetected` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlockDetected {
    pub symbol: String,
    pub order_block: OrderBlock,
}

/// Payload of an `FvgDetected` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FvgDetected {
    pub symbol: String,
    pub fvg: Fvg,
}

/// Payload of an `EntrySignal` event: computed intent to open a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub symbol: String,
    pub side: Side,
    /// Close price that triggered the signal, used as the entry reference
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// True when the price also sits inside a valid FVG of the same direction
    pub confluence: bool,
    /// The order block zone that produced the signal
    pub order_block: OrderBlock,
}

/// Payload of an `OrderPlaced` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: String,
    pub quantity: f64,
    pub price: f64,
}

/// Payload of an `OrderFilled` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFilled {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub fill_price: f64,
    pub filled_size: f64,
    pub timestamp: DateTime<Utc>,
}

/// Payload of a `PositionClosed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionClosed {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub realized_pnl: f64,
    pub close_reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of an `Error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Component that raised the error
    pub component: String,
    /// What the component was doing when it failed
    pub context: String,
    pub message: String,
}
