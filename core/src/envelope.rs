//! Typed events plus delivery metadata, as handed to handlers.

use crate::event::RecordedEvent;
use crate::stream::StreamId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation and tracing fields carried in event metadata.
///
/// All fields are optional; unknown metadata keys are ignored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceMetadata {
    /// Id shared by every event of one business flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Id of the message that caused this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// W3C `traceparent` header value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceparent: Option<String>,
    /// W3C `tracestate` header value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracestate: Option<String>,
}

impl TraceMetadata {
    /// Extract the known fields from a JSON metadata object.
    ///
    /// Anything that is not an object, or fields that are not strings, yield `None`s.
    ///
    /// ```
    /// use catchup_core::envelope::TraceMetadata;
    ///
    /// let trace = TraceMetadata::from_metadata(Some(&serde_json::json!({
    ///     "correlation_id": "corr-1",
    ///     "user_id": "ignored",
    /// })));
    /// assert_eq!(trace.correlation_id.as_deref(), Some("corr-1"));
    /// assert_eq!(trace.causation_id, None);
    /// ```
    #[must_use]
    pub fn from_metadata(metadata: Option<&serde_json::Value>) -> Self {
        let Some(object) = metadata.and_then(serde_json::Value::as_object) else {
            return Self::default();
        };
        let field = |key: &str| {
            object
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };

        Self {
            correlation_id: field("correlation_id"),
            causation_id: field("causation_id"),
            traceparent: field("traceparent"),
            tracestate: field("tracestate"),
        }
    }

    /// Metadata for an event caused by `cause`: same correlation, causation = cause's id.
    #[must_use]
    pub fn caused_by(cause: &EventMetadata) -> Self {
        Self {
            correlation_id: cause
                .trace
                .correlation_id
                .clone()
                .or_else(|| Some(cause.event_id.to_string())),
            causation_id: Some(cause.event_id.to_string()),
            traceparent: cause.trace.traceparent.clone(),
            tracestate: cause.trace.tracestate.clone(),
        }
    }

    /// Render as a JSON metadata object for appends.
    #[must_use]
    pub fn to_metadata(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Delivery metadata of one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventMetadata {
    /// Id of the event.
    pub event_id: Uuid,
    /// Mapped wire type name.
    pub event_type: String,
    /// Stream the event was written to.
    pub stream_id: StreamId,
    /// Offset within the stream.
    pub stream_position: u64,
    /// Global offset within the log.
    pub log_position: u64,
    /// Correlation and tracing context.
    pub trace: TraceMetadata,
}

impl EventMetadata {
    /// Metadata of a recorded event.
    #[must_use]
    pub fn from_record(record: &RecordedEvent) -> Self {
        Self {
            event_id: record.event_id,
            event_type: record.event_type.clone(),
            stream_id: record.stream_id.clone(),
            stream_position: record.stream_position,
            log_position: record.log_position,
            trace: TraceMetadata::from_metadata(record.metadata.as_ref()),
        }
    }
}

/// A decoded event and where it came from.
///
/// Created by the subscription runner for each delivered record and dropped after dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope<E> {
    /// The decoded event.
    pub data: E,
    /// Delivery metadata.
    pub metadata: EventMetadata,
}

impl<E> EventEnvelope<E> {
    /// Wrap a decoded payload with the metadata of its record.
    #[must_use]
    pub fn new(data: E, record: &RecordedEvent) -> Self {
        Self {
            data,
            metadata: EventMetadata::from_record(record),
        }
    }

    /// Global log position of the event.
    #[must_use]
    pub const fn log_position(&self) -> u64 {
        self.metadata.log_position
    }

    /// Wire type name of the event.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.metadata.event_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SerializedEvent;

    #[test]
    fn envelope_copies_record_positions() {
        let metadata = serde_json::json!({
            "correlation_id": "corr-1",
            "causation_id": "cause-1",
            "traceparent": "00-abc-def-01",
        });
        let record = RecordedEvent::from_serialized(
            SerializedEvent::new("ItemAdded".to_string(), vec![1], Some(metadata)),
            StreamId::new("cart-1"),
            2,
            40,
        );

        let envelope = EventEnvelope::new(7_u32, &record);

        assert_eq!(envelope.data, 7);
        assert_eq!(envelope.log_position(), 40);
        assert_eq!(envelope.event_type(), "ItemAdded");
        assert_eq!(envelope.metadata.stream_position, 2);
        assert_eq!(envelope.metadata.trace.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(envelope.metadata.trace.causation_id.as_deref(), Some("cause-1"));
        assert_eq!(envelope.metadata.trace.traceparent.as_deref(), Some("00-abc-def-01"));
        assert_eq!(envelope.metadata.trace.tracestate, None);
    }

    #[test]
    fn non_object_metadata_is_ignored() {
        let trace = TraceMetadata::from_metadata(Some(&serde_json::json!([1, 2])));
        assert_eq!(trace, TraceMetadata::default());
        assert_eq!(TraceMetadata::from_metadata(None), TraceMetadata::default());
    }

    #[test]
    fn caused_by_links_to_cause() {
        let record = RecordedEvent::from_serialized(
            SerializedEvent::new("CartOpened".to_string(), vec![1], None),
            StreamId::new("cart-1"),
            0,
            0,
        );
        let cause = EventMetadata::from_record(&record);

        let trace = TraceMetadata::caused_by(&cause);
        let id = record.event_id.to_string();
        assert_eq!(trace.causation_id.as_deref(), Some(id.as_str()));
        assert_eq!(trace.correlation_id.as_deref(), Some(id.as_str()));

        let json = trace.to_metadata();
        assert_eq!(TraceMetadata::from_metadata(Some(&json)), trace);
    }
}
