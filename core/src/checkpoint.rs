//! Durable "last processed position" per subscription.
//!
//! A [`CheckpointStore`] keeps one [`Checkpoint`] per subscription id and advances it
//! with compare-and-swap: [`CheckpointStore::store`] succeeds only when the backend's
//! current revision equals the revision of the caller's `previous` checkpoint.
//! Conflicts come back as [`StoreResult::Mismatch`], never as errors, and are not
//! retried by the store.
//!
//! # Example
//!
//! ```ignore
//! let checkpoint = store.load("cart-details").await?;
//!
//! match store.store("cart-details", 42, checkpoint).await? {
//!     StoreResult::Success(next) => { /* keep `next` for the following store */ }
//!     StoreResult::Ignored => { /* position behind the previous checkpoint */ }
//!     StoreResult::Mismatch => { /* someone else moved it: reload or give up */ }
//! }
//! ```

use crate::projection::ProjectionError;
use crate::stream::StreamId;
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Wire type name of checkpoint records written by log-based stores.
pub const CHECKPOINT_EVENT_TYPE: &str = "CheckpointStored";

/// Prefix of the dedicated checkpoint stream of each subscription.
pub const CHECKPOINT_STREAM_PREFIX: &str = "checkpoint_";

/// Stream holding the checkpoint records of `subscription_id`.
///
/// ```
/// use catchup_core::checkpoint::checkpoint_stream_id;
///
/// assert_eq!(checkpoint_stream_id("cart-details").as_str(), "checkpoint_cart-details");
/// ```
#[must_use]
pub fn checkpoint_stream_id(subscription_id: &str) -> StreamId {
    StreamId::new(format!("{CHECKPOINT_STREAM_PREFIX}{subscription_id}"))
}

/// Last processed log position of a subscription, plus the backend revision it was read at.
///
/// `Checkpoint::NONE` means "never checkpointed": a subscription starting from it
/// replays the log from the beginning. Backends that do not track a separate
/// revision use the position as revision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last processed log position.
    pub position: Option<u64>,
    /// Version of the underlying checkpoint record, used as the CAS guard.
    pub store_revision: Option<u64>,
}

impl Checkpoint {
    /// Never checkpointed.
    pub const NONE: Self = Self {
        position: None,
        store_revision: None,
    };

    /// Checkpoint at `position`, with the revision defaulting to the position.
    #[must_use]
    pub const fn at(position: u64) -> Self {
        Self {
            position: Some(position),
            store_revision: Some(position),
        }
    }

    /// Checkpoint with an explicitly tracked revision.
    #[must_use]
    pub const fn with_revision(position: Option<u64>, store_revision: u64) -> Self {
        Self {
            position,
            store_revision: Some(store_revision),
        }
    }

    /// `true` when no position is recorded (never stored, or reset).
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.position.is_none()
    }

    /// Whether storing `position` on top of this checkpoint would move it backwards.
    #[must_use]
    pub const fn is_ahead_of(&self, position: u64) -> bool {
        match self.position {
            Some(current) => current > position,
            None => false,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.position, self.store_revision) {
            (None, None) => write!(f, "none"),
            (None, Some(revision)) => write!(f, "none (revision {revision})"),
            (Some(position), None) => write!(f, "{position}"),
            (Some(position), Some(revision)) => write!(f, "{position} (revision {revision})"),
        }
    }
}

/// Outcome of [`CheckpointStore::store`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreResult {
    /// Stored; the checkpoint carries the backend's new revision.
    Success(Checkpoint),
    /// Nothing written: the position is behind `previous`.
    Ignored,
    /// Compare-and-swap failed; nothing written.
    Mismatch,
}

impl StoreResult {
    /// The stored checkpoint, if the store succeeded.
    #[must_use]
    pub const fn checkpoint(&self) -> Option<Checkpoint> {
        match self {
            Self::Success(checkpoint) => Some(*checkpoint),
            Self::Ignored | Self::Mismatch => None,
        }
    }
}

/// Record appended to the checkpoint stream by log-based stores.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStored {
    /// Owning subscription.
    pub subscription_id: String,
    /// Stored position; `None` after a reset.
    pub position: Option<u64>,
    /// When the checkpoint was taken.
    pub checkpointed_at: DateTime<Utc>,
}

/// Boxed future returned by [`CheckpointStore`] methods.
pub type CheckpointFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProjectionError>> + Send + 'a>>;

/// Durable, optimistically concurrent checkpoint storage.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so runners can hold `Arc<dyn CheckpointStore>`.
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint of `subscription_id`; [`Checkpoint::NONE`] if never stored.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if the backend cannot be read.
    fn load(&self, subscription_id: &str) -> CheckpointFuture<'_, Checkpoint>;

    /// Store `position` if the backend is still at `previous`'s revision.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] on backend failure. A lost race is
    /// [`StoreResult::Mismatch`], not an error.
    fn store(
        &self,
        subscription_id: &str,
        position: u64,
        previous: Checkpoint,
    ) -> CheckpointFuture<'_, StoreResult>;

    /// Clear the stored position; the returned marker has no position.
    ///
    /// A subscription restarted from it replays the log from the beginning.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] on backend failure.
    fn reset(&self, subscription_id: &str) -> CheckpointFuture<'_, Checkpoint>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_means_never_checkpointed() {
        assert!(Checkpoint::NONE.is_none());
        assert_eq!(Checkpoint::default(), Checkpoint::NONE);
        assert!(!Checkpoint::at(0).is_none());
    }

    #[test]
    fn revision_defaults_to_position() {
        let checkpoint = Checkpoint::at(5);
        assert_eq!(checkpoint.position, Some(5));
        assert_eq!(checkpoint.store_revision, Some(5));
    }

    #[test]
    fn reset_marker_keeps_revision() {
        let marker = Checkpoint::with_revision(None, 3);
        assert!(marker.is_none());
        assert_eq!(format!("{marker}"), "none (revision 3)");
    }

    #[test]
    fn ahead_of_compares_positions() {
        assert!(Checkpoint::at(10).is_ahead_of(9));
        assert!(!Checkpoint::at(10).is_ahead_of(10));
        assert!(!Checkpoint::NONE.is_ahead_of(0));
    }

    #[test]
    fn store_result_exposes_checkpoint() {
        assert_eq!(
            StoreResult::Success(Checkpoint::at(1)).checkpoint(),
            Some(Checkpoint::at(1))
        );
        assert_eq!(StoreResult::Mismatch.checkpoint(), None);
        assert_eq!(StoreResult::Ignored.checkpoint(), None);
    }
}
