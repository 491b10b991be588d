//! Bus-attached processors forming the trading pipeline
//!
//! Registration order matters for `CandleClosed`: the pattern processor
//! must update the state store before the signal processor scans it for the
//! same candle, and the execution processor checks exits last.

mod execution;
mod pattern;
mod signal;

pub use execution::ExecutionProcessor;
pub use pattern::PatternProcessor;
pub use signal::SignalProcessor;
