//! In-memory append-only log for fast, deterministic tests.
//!
//! [`InMemoryEventLog`] implements [`EventLog`] over a `Vec` of records. Global log
//! positions are indices into that vector, starting at 0. Live subscriptions are
//! woken through a `watch` channel on every append.
//!
//! Failure injection:
//! - [`InMemoryEventLog::drop_subscriptions`] ends every open subscription with
//!   [`EventLogError::SubscriptionDropped`]
//! - [`InMemoryEventLog::fail_next_subscribes`] makes the next `n` subscribe calls fail

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use catchup_core::event::{RecordedEvent, SerializedEvent};
use catchup_core::event_log::{EventLog, EventLogError, LogFuture, RecordStream};
use catchup_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct StreamState {
    /// Number of records ever appended to the stream.
    version: u64,
    max_count: Option<u64>,
}

#[derive(Debug, Default)]
struct LogState {
    records: Vec<RecordedEvent>,
    streams: HashMap<StreamId, StreamState>,
}

/// In-memory [`EventLog`].
///
/// Cloning shares the log.
///
/// # Example
///
/// ```
/// use catchup_core::event::SerializedEvent;
/// use catchup_core::event_log::EventLog;
/// use catchup_core::stream::{StreamId, Version};
/// use catchup_testing::InMemoryEventLog;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = InMemoryEventLog::new();
/// let event = SerializedEvent::new("CartOpened".to_string(), vec![1], None);
///
/// let version = log.append(StreamId::new("cart-1"), Some(Version::INITIAL), vec![event]).await?;
/// assert_eq!(version, Version::new(1));
/// assert_eq!(log.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventLog {
    state: Arc<RwLock<LogState>>,
    appended: Arc<watch::Sender<usize>>,
    drops: Arc<watch::Sender<u64>>,
    subscribe_failures: Arc<AtomicUsize>,
    subscribe_calls: Arc<AtomicUsize>,
}

impl InMemoryEventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(LogState::default())),
            appended: Arc::new(watch::Sender::new(0)),
            drops: Arc::new(watch::Sender::new(0)),
            subscribe_failures: Arc::new(AtomicUsize::new(0)),
            subscribe_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of records in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap().records.len()
    }

    /// Check if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record, in log order.
    #[must_use]
    pub fn records(&self) -> Vec<RecordedEvent> {
        self.state.read().unwrap().records.clone()
    }

    /// Global position of the last record, if any.
    #[must_use]
    pub fn last_position(&self) -> Option<u64> {
        self.len().checked_sub(1).map(|last| last as u64)
    }

    /// Current version of `stream_id` (number of records ever appended).
    #[must_use]
    pub fn stream_version(&self, stream_id: &StreamId) -> Version {
        self.state
            .read()
            .unwrap()
            .streams
            .get(stream_id)
            .map_or(Version::INITIAL, |stream| Version::new(stream.version))
    }

    /// Max-count cap set on `stream_id`.
    #[must_use]
    pub fn stream_max_count(&self, stream_id: &StreamId) -> Option<u64> {
        self.state
            .read()
            .unwrap()
            .streams
            .get(stream_id)
            .and_then(|stream| stream.max_count)
    }

    /// End every open subscription with [`EventLogError::SubscriptionDropped`].
    pub fn drop_subscriptions(&self) {
        self.drops.send_modify(|generation| *generation += 1);
    }

    /// Make the next `count` calls to `subscribe_from` fail with a connection error.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.subscribe_failures.store(count, Ordering::SeqCst);
    }

    /// Number of `subscribe_from` calls so far, failed ones included.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn append_now(
        &self,
        stream_id: &StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Result<Version, EventLogError> {
        let mut state = self.state.write().unwrap();
        let LogState { records, streams } = &mut *state;
        let stream = streams.entry(stream_id.clone()).or_default();

        let current = Version::new(stream.version);
        if let Some(expected) = expected_version {
            if expected != current {
                return Err(EventLogError::ConcurrencyConflict {
                    stream_id: stream_id.clone(),
                    expected,
                    actual: current,
                });
            }
        }

        for event in events {
            let log_position = records.len() as u64;
            records.push(RecordedEvent::from_serialized(
                event,
                stream_id.clone(),
                stream.version,
                log_position,
            ));
            stream.version += 1;
        }

        let version = Version::new(stream.version);
        let total = records.len();
        drop(state);

        self.appended.send_replace(total);
        Ok(version)
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for InMemoryEventLog {
    fn subscribe_from(&self, position: Option<u64>) -> LogFuture<'_, RecordStream> {
        Box::pin(async move {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .subscribe_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(EventLogError::Connection("injected subscribe failure".to_string()));
            }

            let state = Arc::clone(&self.state);
            let mut appended = self.appended.subscribe();
            let mut drops = self.drops.subscribe();
            let mut next =
                position.map_or(0, |p| usize::try_from(p.saturating_add(1)).unwrap_or(usize::MAX));

            let records = async_stream::stream! {
                loop {
                    drop(appended.borrow_and_update());
                    let ready: Vec<RecordedEvent> = state
                        .read()
                        .unwrap()
                        .records
                        .get(next..)
                        .map(<[RecordedEvent]>::to_vec)
                        .unwrap_or_default();

                    for record in ready {
                        next += 1;
                        yield Ok(record);
                    }

                    // None: dropped; Some(false): log gone
                    let woke = tokio::select! {
                        biased;
                        _ = drops.changed() => None,
                        changed = appended.changed() => Some(changed.is_ok()),
                    };
                    match woke {
                        None => {
                            yield Err(EventLogError::SubscriptionDropped("injected drop".to_string()));
                            break;
                        }
                        Some(false) => break,
                        Some(true) => {}
                    }
                }
            };

            Ok(Box::pin(records) as RecordStream)
        })
    }

    fn read_stream(
        &self,
        stream_id: StreamId,
        from: Option<u64>,
    ) -> LogFuture<'_, Vec<RecordedEvent>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let Some(stream) = state.streams.get(&stream_id) else {
                return Ok(Vec::new());
            };

            let retained_from = stream
                .max_count
                .map_or(0, |max| stream.version.saturating_sub(max));
            let from = from.unwrap_or(0).max(retained_from);

            Ok(state
                .records
                .iter()
                .filter(|record| record.stream_id == stream_id && record.stream_position >= from)
                .cloned()
                .collect())
        })
    }

    fn append(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> LogFuture<'_, Version> {
        Box::pin(async move { self.append_now(&stream_id, expected_version, events) })
    }

    fn set_stream_max_count(&self, stream_id: StreamId, max_count: u64) -> LogFuture<'_, ()> {
        Box::pin(async move {
            self.state
                .write()
                .unwrap()
                .streams
                .entry(stream_id)
                .or_default()
                .max_count = Some(max_count);
            Ok(())
        })
    }
}
