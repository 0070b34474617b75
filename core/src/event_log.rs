//! The append-only log, seen from the consumer side.
//!
//! This crate does not implement the log; it is a client of one. [`EventLog`] lists
//! exactly the operations the subscription runner and the log-based checkpoint store
//! need:
//!
//! - subscribe to all streams from a global position
//! - read one stream
//! - append with optimistic concurrency
//! - cap a stream's retained history
//!
//! # Implementations
//!
//! - `InMemoryEventLog` (in `catchup-testing`): deterministic, with drop injection
//!
//! # Example
//!
//! ```no_run
//! use catchup_core::event_log::{EventLog, EventLogError};
//! use catchup_core::stream::{StreamId, Version};
//!
//! async fn example(log: &dyn EventLog) -> Result<(), EventLogError> {
//!     let stream_id = StreamId::new("shop_ShoppingCart-1");
//!
//!     // First write: stream must not exist yet
//!     let version = log.append(stream_id.clone(), Some(Version::INITIAL), vec![]).await?;
//!
//!     // Read it back
//!     let events = log.read_stream(stream_id, None).await?;
//!     Ok(())
//! }
//! ```

use crate::event::{RecordedEvent, SerializedEvent};
use crate::stream::{StreamId, Version};
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors reported by the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventLogError {
    /// Optimistic concurrency conflict: expected version doesn't match current version.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream ID where the conflict occurred.
        stream_id: StreamId,
        /// The version we expected the stream to be at.
        expected: Version,
        /// The actual current version of the stream.
        actual: Version,
    },

    /// The server ended a live subscription.
    #[error("Subscription dropped: {0}")]
    SubscriptionDropped(String),

    /// Connection or timeout failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Anything else.
    #[error("Event log error: {0}")]
    Other(String),
}

impl EventLogError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SubscriptionDropped(_) | Self::Connection(_))
    }
}

/// Live, ordered feed of records. An `Err` item means the subscription dropped.
pub type RecordStream = BoxStream<'static, Result<RecordedEvent, EventLogError>>;

/// Boxed future returned by [`EventLog`] methods.
pub type LogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventLogError>> + Send + 'a>>;

/// Client view of an append-only log.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so runners and stores can hold `Arc<dyn EventLog>`.
pub trait EventLog: Send + Sync {
    /// Subscribe to every stream, in global log order.
    ///
    /// - `Some(position)`: deliver records strictly after `position`
    /// - `None`: deliver from the beginning of the log
    ///
    /// The stream stays open and yields new records as they are appended.
    /// A transport failure is delivered as an `Err` item; the stream should be
    /// considered dead afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Connection`] if the subscription cannot be opened.
    fn subscribe_from(&self, position: Option<u64>) -> LogFuture<'_, RecordStream>;

    /// Read one stream, oldest first.
    ///
    /// `from` is an inclusive stream position; `None` reads from the start. A stream
    /// that does not exist reads as empty. Records removed by a max-count cap are
    /// not returned.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Connection`] on transport failure.
    fn read_stream(&self, stream_id: StreamId, from: Option<u64>)
    -> LogFuture<'_, Vec<RecordedEvent>>;

    /// Append events with optimistic concurrency.
    ///
    /// - `Some(version)`: the stream must currently be at `version`
    ///   (`Version::INITIAL` means it must not exist)
    /// - `None`: append regardless of the current version
    ///
    /// Returns the stream version after the append.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::ConcurrencyConflict`] when the expectation fails.
    fn append(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> LogFuture<'_, Version>;

    /// Retain at most `max_count` most recent records of `stream_id`.
    ///
    /// Setting the same cap again must succeed.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Connection`] on transport failure.
    fn set_stream_max_count(&self, stream_id: StreamId, max_count: u64) -> LogFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_error_display() {
        let error = EventLogError::ConcurrencyConflict {
            stream_id: StreamId::new("checkpoint_orders"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("checkpoint_orders"));
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn drops_and_connection_failures_are_transient() {
        assert!(EventLogError::SubscriptionDropped("server restart".into()).is_transient());
        assert!(EventLogError::Connection("timeout".into()).is_transient());
        assert!(!EventLogError::Serialization("bad".into()).is_transient());
        assert!(
            !EventLogError::ConcurrencyConflict {
                stream_id: StreamId::new("s"),
                expected: Version::INITIAL,
                actual: Version::new(1),
            }
            .is_transient()
        );
    }
}
