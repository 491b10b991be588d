//! Event envelope and the closed vocabulary of event kinds

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::BusError;

/// Every kind of event that can travel over the bus.
///
/// The set is closed: components communicate only through these kinds, which
/// keeps the data flow of the whole pipeline auditable from one enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A candlestick period completed; triggers pattern analysis
    CandleClosed,
    /// An Order Block pattern was identified in price action
    OrderBlockDetected,
    /// A Fair Value Gap was detected
    FvgDetected,
    /// Strategy conditions aligned for a trade entry
    EntrySignal,
    /// An order was accepted by the broker but not yet filled
    OrderPlaced,
    /// A broker order was completely filled
    OrderFilled,
    /// A trading position was fully closed
    PositionClosed,
    /// A system error occurred somewhere in the pipeline
    Error,
}

impl EventKind {
    /// All kinds, in pipeline order. Useful for exhaustive subscription maps.
    pub const ALL: [EventKind; 8] = [
        EventKind::CandleClosed,
        EventKind::OrderBlockDetected,
        EventKind::FvgDetected,
        EventKind::EntrySignal,
        EventKind::OrderPlaced,
        EventKind::OrderFilled,
        EventKind::PositionClosed,
        EventKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CandleClosed => "candle_closed",
            EventKind::OrderBlockDetected => "order_block_detected",
            EventKind::FvgDetected => "fvg_detected",
            EventKind::EntrySignal => "entry_signal",
            EventKind::OrderPlaced => "order_placed",
            EventKind::OrderFilled => "order_filled",
            EventKind::PositionClosed => "position_closed",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable event envelope.
///
/// The payload is always a key-value JSON object, never a scalar, so every
/// subscriber can inspect fields without knowing the publisher. The timestamp
/// defaults to creation time. There are no mutators: once constructed an
/// event never changes.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    payload: Map<String, Value>,
    source: String,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Build an event from a raw JSON object payload, timestamped now.
    pub fn new(kind: EventKind, payload: Map<String, Value>, source: impl Into<String>) -> Self {
        Self {
            kind,
            payload,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build an event from a typed payload.
    ///
    /// Fails when the payload does not serialize to a JSON object; scalar
    /// payloads are rejected by design.
    pub fn with_payload<T: Serialize>(
        kind: EventKind,
        payload: &T,
        source: impl Into<String>,
    ) -> Result<Self, BusError> {
        let value = serde_json::to_value(payload)
            .map_err(|source| BusError::PayloadSerialize { kind, source })?;
        match value {
            Value::Object(map) => Ok(Self::new(kind, map, source)),
            _ => Err(BusError::NonObjectPayload { kind }),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Parse the payload into a typed view.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|source| {
            BusError::PayloadParse {
                kind: self.kind,
                source,
            }
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event({} from {} at {})", self.kind, self.source, self.timestamp)
    }
}
