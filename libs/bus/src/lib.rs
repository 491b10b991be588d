//! # Event Bus
//!
//! Event-driven coordination core for the trading pipeline:
//!
//! - [`Event`] / [`EventKind`] — immutable message envelope over a closed
//!   vocabulary of event kinds
//! - [`EventBus`] — queue-backed publish/subscribe with a single dispatch
//!   task, per-handler timeouts, and fault isolation
//! - [`Processor`] / [`ManagedProcessor`] — standardized start/stop contract
//!   for bus subscribers
//! - [`Orchestrator`] — bulk lifecycle management (start in registration
//!   order, stop in reverse)
//!
//! Publishing never blocks the caller and delivery order is the publish
//! order across all publishers (single FIFO queue). A handler that panics,
//! errors, or overruns its timeout is logged and skipped; it never affects
//! delivery to other handlers.

mod bus;
mod error;
mod event;
mod orchestrator;
mod processor;

pub use bus::{BusConfig, EventBus, Handler, HandlerId};
pub use error::BusError;
pub use event::{Event, EventKind};
pub use orchestrator::Orchestrator;
pub use processor::{ManagedProcessor, Processor};
