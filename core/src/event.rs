//! Wire-level event records.
//!
//! Two shapes travel between this crate and the append-only log:
//!
//! - [`SerializedEvent`]: what a writer hands to [`EventLog::append`](crate::event_log::EventLog::append)
//! - [`RecordedEvent`]: what the log hands back on reads and subscriptions, with positions attached
//!
//! Payloads are `bincode` bytes. Metadata is free-form JSON; the fields this crate
//! understands are listed on [`TraceMetadata`](crate::envelope::TraceMetadata).
//!
//! # Example
//!
//! ```
//! use catchup_core::event::SerializedEvent;
//!
//! let event = SerializedEvent::new("orders_OrderPlaced".to_string(), vec![1, 2, 3], None);
//! assert_eq!(event.event_type, "orders_OrderPlaced");
//! assert!(!event.is_empty());
//! ```

use crate::stream::StreamId;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for event encoding and type resolution.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event {event_type}: {reason}")]
    DeserializationError {
        /// Wire name of the record that failed to decode.
        event_type: String,
        /// Decoder error message.
        reason: String,
    },

    /// Wire name has no registered type.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// Type has no registered wire name.
    #[error("Type {0} is not registered")]
    UnregisteredType(&'static str),

    /// Two registrations claimed the same wire name.
    #[error("Duplicate event type name: {0}")]
    DuplicateEventType(String),
}

/// Serialize a payload with the crate's wire format.
///
/// # Errors
///
/// Returns [`EventError::SerializationError`] if `bincode` rejects the value.
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, EventError> {
    bincode::serialize(value).map_err(|e| EventError::SerializationError(e.to_string()))
}

/// Deserialize a payload written by [`to_bytes`].
///
/// # Errors
///
/// Returns [`EventError::DeserializationError`] if the bytes do not decode as `T`.
pub fn from_bytes<T: DeserializeOwned>(event_type: &str, bytes: &[u8]) -> Result<T, EventError> {
    bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}

/// A serialized event ready to be appended.
///
/// Contains the wire type name and payload bytes, plus optional metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedEvent {
    /// Unique id of this event, assigned by the writer.
    pub event_id: Uuid,

    /// The wire type name (see [`EventTypeMapper`](crate::type_mapper::EventTypeMapper)).
    pub event_type: String,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,

    /// Optional metadata in JSON format.
    ///
    /// Common metadata fields:
    /// - `correlation_id`: Links related events across streams
    /// - `causation_id`: Links cause-and-effect events
    /// - `traceparent` / `tracestate`: propagated tracing context
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event with a fresh random id.
    #[must_use]
    pub fn new(event_type: String, data: Vec<u8>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            data,
            metadata,
        }
    }

    /// `true` when the payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}

/// An event as stored in the log, with its positions.
///
/// `stream_position` is the zero-based offset inside `stream_id`;
/// `log_position` is the global, monotonically increasing offset across all streams.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    /// Id assigned when the event was written.
    pub event_id: Uuid,
    /// Wire type name.
    pub event_type: String,
    /// Payload bytes. Empty for administrative/no-op records.
    pub data: Vec<u8>,
    /// JSON metadata, if any.
    pub metadata: Option<serde_json::Value>,
    /// Stream the event belongs to.
    pub stream_id: StreamId,
    /// Offset within the stream.
    pub stream_position: u64,
    /// Global offset within the log.
    pub log_position: u64,
}

impl RecordedEvent {
    /// Attach positions to a serialized event.
    #[must_use]
    pub fn from_serialized(
        event: SerializedEvent,
        stream_id: StreamId,
        stream_position: u64,
        log_position: u64,
    ) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            data: event.data,
            metadata: event.metadata,
            stream_id,
            stream_position,
            log_position,
        }
    }

    /// `true` for records with no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for RecordedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({}#{})",
            self.event_type, self.log_position, self.stream_id, self.stream_position
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct ItemAdded {
        cart_id: String,
        quantity: u32,
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn payload_roundtrip() {
        let event = ItemAdded {
            cart_id: "cart-1".to_string(),
            quantity: 3,
        };

        let bytes = to_bytes(&event).expect("serialization should succeed");
        let decoded: ItemAdded = from_bytes("ItemAdded", &bytes).expect("decode should succeed");

        assert_eq!(event, decoded);
    }

    #[test]
    fn decode_failure_names_the_type() {
        let result: Result<ItemAdded, _> = from_bytes("ItemAdded", &[0xFF]);
        let message = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("ItemAdded"));
    }

    #[test]
    fn recorded_event_keeps_serialized_fields() {
        let serialized = SerializedEvent::new("ItemAdded".to_string(), vec![1, 2], None);
        let id = serialized.event_id;
        let recorded =
            RecordedEvent::from_serialized(serialized, StreamId::new("cart-1"), 4, 17);

        assert_eq!(recorded.event_id, id);
        assert_eq!(recorded.stream_position, 4);
        assert_eq!(recorded.log_position, 17);
        assert_eq!(format!("{recorded}"), "ItemAdded@17 (cart-1#4)");
    }

    #[test]
    fn empty_payload_is_detected() {
        let serialized = SerializedEvent::new("$metadata".to_string(), Vec::new(), None);
        assert!(serialized.is_empty());
    }
}
