//! Error types for event bus operations

use thiserror::Error;

use crate::EventKind;

/// Errors surfaced by the event bus API.
///
/// Handler failures are deliberately absent: they are isolated inside the
/// dispatch loop and reported via logs, never to the publisher.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been stopped and no longer accepts events
    #[error("event bus is stopped")]
    Stopped,

    /// A typed payload did not serialize to a JSON object
    #[error("payload for {kind} event must be a JSON object")]
    NonObjectPayload { kind: EventKind },

    /// A typed payload failed to serialize
    #[error("failed to serialize {kind} payload: {source}")]
    PayloadSerialize {
        kind: EventKind,
        source: serde_json::Error,
    },

    /// An event payload failed to parse into the requested type
    #[error("failed to parse {kind} payload: {source}")]
    PayloadParse {
        kind: EventKind,
        source: serde_json::Error,
    },
}
