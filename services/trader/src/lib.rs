//! # ICT Trader
//!
//! Event-driven trading service implementing an ICT (Inner Circle Trader)
//! strategy: a market data feed publishes closed candles onto an event bus,
//! pattern detection finds Order Blocks and Fair Value Gaps, the signal
//! engine turns zone touches into entry signals, and the execution state
//! machine trades them under risk limits.
//!
//! The pipeline is held together by the `bus` crate; every stage is a
//! [`bus::Processor`] registered with the [`bus::Orchestrator`] in data-flow
//! order.

pub mod broker;
pub mod config;
pub mod feed;
pub mod notifier;
pub mod patterns;
pub mod processors;
pub mod risk;
pub mod state;
