//! # Trading Domain Types
//!
//! Shared type definitions for the pattern-based trading pipeline:
//!
//! - [`Candle`] — immutable OHLCV candle produced by the market data feed
//! - [`OrderBlock`] / [`Fvg`] — detected ICT price patterns
//! - [`Position`] — the single mutable trading entity, with risk-parameter
//!   validation at construction
//! - Event payload structs ([`payloads`]) that round-trip through the event
//!   bus as JSON objects
//!
//! All constructors validate their invariants and return [`ModelError`] on
//! violation; once built, only [`Position`] permits mutation (trailing-stop
//! updates). Prices are `f64` throughout, matching the upstream feed.

mod candle;
mod error;
mod patterns;
pub mod payloads;
mod position;

pub use candle::Candle;
pub use error::ModelError;
pub use patterns::{Direction, Fvg, OrderBlock};
pub use position::{Position, Side};
