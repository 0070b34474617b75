//! # Catchup Testing
//!
//! Testing utilities for subscriptions and projections.
//!
//! This crate provides:
//! - [`InMemoryEventLog`]: an [`EventLog`](catchup_core::event_log::EventLog) with drop
//!   and subscribe-failure injection
//! - [`InMemoryViewStore`]: a [`ViewStore`](catchup_core::projection::ViewStore) with
//!   commit-failure injection and recorded loads
//! - [`RecordingHandler`]: an [`EventHandler`](catchup_core::projection::EventHandler)
//!   that keeps what it was given
//! - [`ProjectionTestHarness`]: given/then API over a projection handler
//!
//! ## Example
//!
//! ```ignore
//! use catchup_testing::{InMemoryEventLog, RecordingHandler, init_test_tracing};
//!
//! #[tokio::test]
//! async fn delivers_in_order() {
//!     let _tracing = init_test_tracing();
//!     let log = InMemoryEventLog::new();
//!     let handler = RecordingHandler::new("recorder");
//!     // build a SubscriptionRunner over `log` with `handler.clone()` ...
//! }
//! ```

use catchup_core::envelope::EventEnvelope;
use catchup_core::event::{RecordedEvent, SerializedEvent};
use catchup_core::stream::StreamId;
use catchup_core::type_mapper::default_type_name;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// In-memory event log
pub mod event_log;

/// Given/then projection harness
pub mod harness;

/// Recording handler
pub mod handler;

/// In-memory view store
pub mod view_store;

pub use event_log::InMemoryEventLog;
pub use handler::RecordingHandler;
pub use harness::ProjectionTestHarness;
pub use view_store::{InMemoryViewStore, LoadCall};

/// Install a thread-local subscriber writing to the test output.
///
/// The filter comes from `RUST_LOG`, defaulting to `debug`. Keep the guard alive for
/// the duration of the test.
#[must_use]
pub fn init_test_tracing() -> DefaultGuard {
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with(fmt::layer().with_test_writer());

    tracing::subscriber::set_default(subscriber)
}

/// Envelope around `data` as if read at `log_position` from a `test-stream`.
#[must_use]
pub fn test_envelope<E>(data: E, log_position: u64) -> EventEnvelope<E> {
    let record = RecordedEvent::from_serialized(
        SerializedEvent::new(default_type_name::<E>(), Vec::new(), None),
        StreamId::new("test-stream"),
        log_position,
        log_position,
    );
    EventEnvelope::new(data, &record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_carries_position() {
        let envelope = test_envelope(7_u32, 3);
        assert_eq!(envelope.log_position(), 3);
        assert_eq!(envelope.metadata.stream_position, 3);
        assert_eq!(envelope.data, 7);
    }

    #[test]
    fn tracing_guard_installs_subscriber() {
        let _guard = init_test_tracing();
        tracing::debug!("tracing installed");
    }
}
