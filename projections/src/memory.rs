//! In-memory checkpoint store.
//!
//! Process-local and lost on restart: suitable for tests and for consumers that
//! rebuild from the start of the log anyway. The store revision is the stored
//! position itself.

use catchup_core::checkpoint::{Checkpoint, CheckpointFuture, CheckpointStore, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// [`CheckpointStore`] backed by a map.
///
/// Cloning shares the map, so several runners (or a runner and a test) can observe the
/// same checkpoints.
///
/// # Example
///
/// ```
/// use catchup_core::checkpoint::{Checkpoint, CheckpointStore, StoreResult};
/// use catchup_projections::InMemoryCheckpointStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryCheckpointStore::new();
///
/// let result = store.store("carts", 5, Checkpoint::NONE).await?;
/// assert_eq!(result, StoreResult::Success(Checkpoint::at(5)));
///
/// // A second writer still holding NONE loses the race
/// assert_eq!(store.store("carts", 7, Checkpoint::NONE).await?, StoreResult::Mismatch);
/// assert_eq!(store.load("carts").await?, Checkpoint::at(5));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCheckpointStore {
    positions: Arc<RwLock<HashMap<String, Option<u64>>>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions with a stored entry (reset ones included).
    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }

    /// Check if nothing was ever stored.
    pub async fn is_empty(&self) -> bool {
        self.positions.read().await.is_empty()
    }
}

fn checkpoint_of(position: Option<u64>) -> Checkpoint {
    position.map_or(Checkpoint::NONE, Checkpoint::at)
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, subscription_id: &str) -> CheckpointFuture<'_, Checkpoint> {
        let subscription_id = subscription_id.to_string();
        Box::pin(async move {
            let positions = self.positions.read().await;
            Ok(checkpoint_of(positions.get(&subscription_id).copied().flatten()))
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

            let mut positions = self.positions.write().await;
            let current = checkpoint_of(positions.get(&subscription_id).copied().flatten());
            if current.store_revision != previous.store_revision {
                tracing::debug!(
                    subscription_id = %subscription_id,
                    expected = %previous,
                    current = %current,
                    "Checkpoint revision mismatch"
                );
                return Ok(StoreResult::Mismatch);
            }

            positions.insert(subscription_id, Some(position));
            Ok(StoreResult::Success(Checkpoint::at(position)))
        })
    }

    fn reset(&self, subscription_id: &str) -> CheckpointFuture<'_, Checkpoint> {
        let subscription_id = subscription_id.to_string();
        Box::pin(async move {
            self.positions.write().await.insert(subscription_id, None);
            Ok(Checkpoint::NONE)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[tokio::test]
    async fn store_behind_previous_is_ignored() {
        let store = InMemoryCheckpointStore::new();
        store.store("carts", 10, Checkpoint::NONE).await.unwrap();

        let result = store.store("carts", 4, Checkpoint::at(10)).await.unwrap();

        assert_eq!(result, StoreResult::Ignored);
        assert_eq!(store.load("carts").await.unwrap(), Checkpoint::at(10));
    }

    #[tokio::test]
    async fn reset_clears_position() {
        let store = InMemoryCheckpointStore::new();
        store.store("carts", 3, Checkpoint::NONE).await.unwrap();

        let marker = store.reset("carts").await.unwrap();

        assert!(marker.is_none());
        assert_eq!(store.load("carts").await.unwrap(), Checkpoint::NONE);
        assert_eq!(
            store.store("carts", 1, marker).await.unwrap(),
            StoreResult::Success(Checkpoint::at(1))
        );
    }

    #[tokio::test]
    async fn subscriptions_are_independent() {
        let store = InMemoryCheckpointStore::new();
        store.store("carts", 3, Checkpoint::NONE).await.unwrap();

        assert_eq!(store.load("orders").await.unwrap(), Checkpoint::NONE);
        assert_eq!(store.len().await, 1);
    }
}
