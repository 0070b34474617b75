//! Checkpoints kept in the event log itself.
//!
//! Each subscription owns a stream `checkpoint_{subscription_id}`. Storing a checkpoint
//! appends a [`CheckpointStored`] record with the stream's expected version set to the
//! revision of the caller's previous checkpoint, so the log's own optimistic concurrency
//! is the compare-and-swap. The stream is capped to its last record.
//!
//! ```text
//! checkpoint_carts:  #0 {position: 5}   #1 {position: 9}   #2 {position: None}  (reset)
//!                                        revision 2          revision 3
//! ```
//!
//! Subscription runners skip [`CHECKPOINT_EVENT_TYPE`] records, so checkpoints never
//! reach handlers even when they share the log with domain events.

use catchup_core::checkpoint::{
    CHECKPOINT_EVENT_TYPE, Checkpoint, CheckpointFuture, CheckpointStore, CheckpointStored,
    StoreResult, checkpoint_stream_id,
};
use catchup_core::event::{SerializedEvent, from_bytes, to_bytes};
use catchup_core::event_log::{EventLog, EventLogError};
use catchup_core::projection::{ProjectionError, Result};
use catchup_core::stream::Version;
use chrono::Utc;
use std::sync::Arc;

/// Records kept per checkpoint stream.
const CHECKPOINT_STREAM_MAX_COUNT: u64 = 1;

/// [`CheckpointStore`] writing to a dedicated stream per subscription.
#[derive(Clone)]
pub struct EventLogCheckpointStore {
    log: Arc<dyn EventLog>,
}

impl std::fmt::Debug for EventLogCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogCheckpointStore").finish_non_exhaustive()
    }
}

impl EventLogCheckpointStore {
    /// Create a store over `log`.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    async fn append(
        &self,
        subscription_id: &str,
        position: Option<u64>,
        expected: Option<Version>,
    ) -> std::result::Result<Version, EventLogError> {
        let record = CheckpointStored {
            subscription_id: subscription_id.to_string(),
            position,
            checkpointed_at: Utc::now(),
        };
        let data = to_bytes(&record).map_err(|e| EventLogError::Serialization(e.to_string()))?;
        let event = SerializedEvent::new(CHECKPOINT_EVENT_TYPE.to_string(), data, None);

        self.log
            .append(checkpoint_stream_id(subscription_id), expected, vec![event])
            .await
    }

    /// Cap the checkpoint stream. Repeating the call is harmless.
    async fn cap_stream(&self, subscription_id: &str) -> Result<()> {
        self.log
            .set_stream_max_count(
                checkpoint_stream_id(subscription_id),
                CHECKPOINT_STREAM_MAX_COUNT,
            )
            .await
            .map_err(|e| {
                ProjectionError::Checkpoint(format!(
                    "Failed to cap checkpoint stream of '{subscription_id}': {e}"
                ))
            })
    }
}

impl CheckpointStore for EventLogCheckpointStore {
    fn load(&self, subscription_id: &str) -> CheckpointFuture<'_, Checkpoint> {
        let subscription_id = subscription_id.to_string();
        Box::pin(async move {
            let records = self
                .log
                .read_stream(checkpoint_stream_id(&subscription_id), None)
                .await
                .map_err(|e| {
                    ProjectionError::Checkpoint(format!(
                        "Failed to read checkpoint of '{subscription_id}': {e}"
                    ))
                })?;

            let Some(last) = records.last() else {
                return Ok(Checkpoint::NONE);
            };
            let stored: CheckpointStored = from_bytes(&last.event_type, &last.data)?;
            Ok(Checkpoint::with_revision(
                stored.position,
                Version::after_position(last.stream_position).value(),
            ))
        })
    }

    fn store(
        &self,
        subscription_id: &str,
        position: u64,
        previous: Checkpoint,
    ) -> CheckpointFuture<'_, StoreResult> {
        let subscription_id = subscription_id.to_string();
        Box::pin(async move {
            if previous.is_ahead_of(position) {
                return Ok(StoreResult::Ignored);
            }

            // First write of this subscription: cap the stream before it exists.
            if previous.store_revision.is_none() {
                self.cap_stream(&subscription_id).await?;
            }

            let expected = previous.store_revision.map_or(Version::INITIAL, Version::new);
            match self.append(&subscription_id, Some(position), Some(expected)).await {
                Ok(version) => Ok(StoreResult::Success(Checkpoint::with_revision(
                    Some(position),
                    version.value(),
                ))),
                Err(EventLogError::ConcurrencyConflict { actual, .. }) => {
                    tracing::debug!(
                        subscription_id = %subscription_id,
                        expected = %expected,
                        actual = %actual,
                        "Checkpoint stream moved"
                    );
                    Ok(StoreResult::Mismatch)
                }
                Err(e) => Err(ProjectionError::Checkpoint(format!(
                    "Failed to store checkpoint of '{subscription_id}': {e}"
                ))),
            }
        })
    }

    fn reset(&self, subscription_id: &str) -> CheckpointFuture<'_, Checkpoint> {
        let subscription_id = subscription_id.to_string();
        Box::pin(async move {
            self.cap_stream(&subscription_id).await?;
            let version = self.append(&subscription_id, None, None).await.map_err(|e| {
                ProjectionError::Checkpoint(format!(
                    "Failed to reset checkpoint of '{subscription_id}': {e}"
                ))
            })?;

            tracing::info!(subscription_id = %subscription_id, "Checkpoint reset");
            Ok(Checkpoint::with_revision(None, version.value()))
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use catchup_testing::InMemoryEventLog;

    fn store_over(log: &InMemoryEventLog) -> EventLogCheckpointStore {
        EventLogCheckpointStore::new(Arc::new(log.clone()))
    }

    #[tokio::test]
    async fn revisions_follow_the_stream_version() {
        let log = InMemoryEventLog::new();
        let store = store_over(&log);

        let first = store.store("carts", 5, Checkpoint::NONE).await.unwrap();
        assert_eq!(first, StoreResult::Success(Checkpoint::with_revision(Some(5), 1)));

        let second = store.store("carts", 9, first.checkpoint().unwrap()).await.unwrap();
        assert_eq!(second, StoreResult::Success(Checkpoint::with_revision(Some(9), 2)));

        assert_eq!(
            store.load("carts").await.unwrap(),
            Checkpoint::with_revision(Some(9), 2)
        );
    }

    #[tokio::test]
    async fn first_store_caps_the_stream() {
        let log = InMemoryEventLog::new();
        let store = store_over(&log);

        store.store("carts", 1, Checkpoint::NONE).await.unwrap();

        assert_eq!(
            log.stream_max_count(&checkpoint_stream_id("carts")),
            Some(CHECKPOINT_STREAM_MAX_COUNT)
        );
    }

    #[tokio::test]
    async fn stale_revision_is_a_mismatch() {
        let log = InMemoryEventLog::new();
        let store = store_over(&log);
        let first = store.store("carts", 5, Checkpoint::NONE).await.unwrap();
        store.store("carts", 6, first.checkpoint().unwrap()).await.unwrap();

        let stale = store.store("carts", 8, first.checkpoint().unwrap()).await.unwrap();

        assert_eq!(stale, StoreResult::Mismatch);
        assert_eq!(store.load("carts").await.unwrap().position, Some(6));
    }

    #[tokio::test]
    async fn reset_keeps_a_revision_for_the_next_store() {
        let log = InMemoryEventLog::new();
        let store = store_over(&log);
        store.store("carts", 5, Checkpoint::NONE).await.unwrap();

        let marker = store.reset("carts").await.unwrap();
        assert_eq!(marker, Checkpoint::with_revision(None, 2));
        assert!(store.load("carts").await.unwrap().is_none());

        let next = store.store("carts", 0, marker).await.unwrap();
        assert_eq!(next, StoreResult::Success(Checkpoint::with_revision(Some(0), 3)));
    }

    #[tokio::test]
    async fn unreadable_record_is_an_error() {
        let log = InMemoryEventLog::new();
        log.append(
            checkpoint_stream_id("carts"),
            None,
            vec![SerializedEvent::new(CHECKPOINT_EVENT_TYPE.to_string(), vec![0xff], None)],
        )
        .await
        .unwrap();

        let result = EventLogCheckpointStore::new(Arc::new(log)).load("carts").await;
        assert!(matches!(result, Err(ProjectionError::Serialization(_))));
    }
}
