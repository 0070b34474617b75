//! Handlers and projections: the consuming side of a subscription.
//!
//! # Overview
//!
//! A subscription delivers [`EventEnvelope`]s to one or more [`EventHandler`]s.
//! The main handler is a batch projection, which folds envelopes into denormalized
//! view rows kept in a [`ViewStore`]:
//!
//! ```text
//! log ──► SubscriptionRunner ──► EventHandler (BatchProjectionHandler)
//!                │                        │ bulk_load / commit
//!                ▼                        ▼
//!         CheckpointStore            ViewStore (read model)
//! ```
//!
//! ## Projection rules
//!
//! A [`ViewProjection`] decides, per event, whether it cares ([`ViewProjection::route`]),
//! which view row the event targets, and whether the event creates the row or folds
//! into it. Folding may delete the row by returning `None`.
//!
//! ## Idempotency
//!
//! Delivery is at-least-once. A crash between handling and checkpointing replays the
//! last unit, so rules must be upserts/deletes computed from event data, never blind
//! increments.
//!
//! ## Example
//!
//! ```ignore
//! impl ViewProjection for CartDetailsProjection {
//!     type Event = CartEvent;
//!     type View = CartDetails;
//!
//!     fn name(&self) -> &str {
//!         "cart_details"
//!     }
//!
//!     fn route(&self, event: &CartEvent) -> Option<Route> {
//!         match event {
//!             CartEvent::Opened(e) => Some(Route::create(&e.cart_id)),
//!             CartEvent::ItemAdded(e) => Some(Route::evolve(&e.cart_id)),
//!             CartEvent::Abandoned(e) => Some(Route::evolve(&e.cart_id)),
//!             _ => None,
//!         }
//!     }
//!
//!     fn create(&self, envelope: &EventEnvelope<CartEvent>) -> CartDetails { /* ... */ }
//!
//!     fn evolve(&self, view: CartDetails, envelope: &EventEnvelope<CartEvent>) -> Option<CartDetails> {
//!         match &envelope.data {
//!             CartEvent::Abandoned(_) => None, // delete the row
//!             _ => Some(/* updated view */),
//!         }
//!     }
//! }
//! ```

use crate::envelope::EventEnvelope;
use crate::event::EventError;
use crate::event_log::EventLogError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Error type for handler, projection and checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Read-model storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Checkpoint backend error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Event processing error
    #[error("Event processing error: {0}")]
    EventProcessing(String),

    /// Missing or invalid collaborator/configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error reported by the event log
    #[error("Event log error: {0}")]
    Log(#[from] EventLogError),

    /// Generic error
    #[error("Projection error: {0}")]
    Other(String),
}

impl ProjectionError {
    /// Whether re-attempting the same unit of work may succeed.
    ///
    /// Storage failures and transient log failures are retryable; rule, decoding and
    /// configuration failures are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Storage(_) => true,
            Self::Log(error) => error.is_transient(),
            Self::Serialization(_)
            | Self::Checkpoint(_)
            | Self::EventProcessing(_)
            | Self::Configuration(_)
            | Self::Other(_) => false,
        }
    }
}

impl From<EventError> for ProjectionError {
    fn from(error: EventError) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Boxed future returned by [`EventHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Consumer of delivered envelopes.
///
/// `handle` receives one unit of work (a single envelope, or a batch) in log order.
/// Returning `Err` aborts the unit: the subscription does not checkpoint it and will
/// deliver it again.
///
/// # Dyn Compatibility
///
/// Returns a boxed future so runners can hold `Arc<dyn EventHandler<E>>`.
pub trait EventHandler<E>: Send + Sync {
    /// Handler name, used in logs.
    fn name(&self) -> &str;

    /// Handle a unit of envelopes.
    ///
    /// # Errors
    ///
    /// Any error aborts the unit; see the trait docs.
    fn handle<'a>(&'a self, envelopes: &'a [EventEnvelope<E>]) -> HandlerFuture<'a>;
}

/// How an event affects its target view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewRule {
    /// Produce a fresh view instance.
    Create,
    /// Fold into the existing view (update, or delete by returning `None`).
    Evolve,
}

/// Target view row and rule for one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    /// Identity of the target view row.
    pub view_id: String,
    /// Rule to apply.
    pub rule: ViewRule,
}

impl Route {
    /// The event creates the view `view_id`.
    #[must_use]
    pub fn create(view_id: impl Into<String>) -> Self {
        Self {
            view_id: view_id.into(),
            rule: ViewRule::Create,
        }
    }

    /// The event folds into the view `view_id`.
    #[must_use]
    pub fn evolve(view_id: impl Into<String>) -> Self {
        Self {
            view_id: view_id.into(),
            rule: ViewRule::Evolve,
        }
    }
}

/// Rules that fold events into one kind of view row.
///
/// Dispatch is a `match` over the event union inside [`route`](Self::route),
/// [`create`](Self::create) and [`evolve`](Self::evolve).
pub trait ViewProjection: Send + Sync {
    /// Event union this projection reads.
    type Event: Send + Sync;

    /// View row type. `Default` is the starting point for events that fold into a
    /// row whose creation was never seen.
    type View: Default + Clone + Send + Sync;

    /// Projection name, used in logs.
    fn name(&self) -> &str;

    /// Target row and rule for `event`, or `None` if this projection ignores it.
    fn route(&self, event: &Self::Event) -> Option<Route>;

    /// Build a new view from a creating event.
    fn create(&self, envelope: &EventEnvelope<Self::Event>) -> Self::View;

    /// Fold an event into an existing view. `None` deletes the row.
    fn evolve(&self, view: Self::View, envelope: &EventEnvelope<Self::Event>)
    -> Option<Self::View>;

    /// Names of related data the store should load together with the rows.
    fn eager_load(&self) -> &[&'static str] {
        &[]
    }
}

/// One mutation of the read model.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewChange<V> {
    /// Insert or replace the row `id`.
    Upsert {
        /// Row identity.
        id: String,
        /// New row content.
        view: V,
    },
    /// Remove the row `id` (no-op if absent).
    Delete {
        /// Row identity.
        id: String,
    },
}

impl<V> ViewChange<V> {
    /// Identity of the affected row.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id } => id,
        }
    }
}

/// Read-model storage used by batch projections.
///
/// # Example
///
/// ```ignore
/// let rows = store.bulk_load(&["cart-1".to_string()], &[]).await?;
/// store.commit(vec![ViewChange::Delete { id: "cart-1".to_string() }]).await?;
/// ```
pub trait ViewStore<V>: Send + Sync {
    /// Load all existing rows among `ids` in one round trip.
    ///
    /// Missing ids are absent from the returned map. `related` carries the
    /// projection's eager-load hint.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the load fails.
    fn bulk_load(
        &self,
        ids: &[String],
        related: &[&'static str],
    ) -> impl Future<Output = Result<HashMap<String, V>>> + Send;

    /// Apply all changes as one committed unit: all of them, or none.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the commit fails.
    fn commit(&self, changes: Vec<ViewChange<V>>) -> impl Future<Output = Result<()>> + Send;
}
