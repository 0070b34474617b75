//! Given/then harness for projection handlers.

use crate::test_envelope;
use crate::view_store::InMemoryViewStore;
use catchup_core::envelope::EventEnvelope;
use catchup_core::projection::{EventHandler, Result};

/// Test harness for projection handlers providing a fluent testing API.
///
/// Events given to the harness are wrapped into envelopes at increasing log
/// positions and handed to the handler as one unit per call, the way a subscription
/// runner would.
///
/// # Example
///
/// ```ignore
/// let store = InMemoryViewStore::new();
/// let handler = BatchProjectionHandler::new(CartDetailsProjection, store.clone());
/// let mut harness = ProjectionTestHarness::new(handler, store);
///
/// harness.given_events(vec![opened, item_added]).await?;
/// harness.then_contains("cart-1").then_not_contains("cart-2");
/// ```
#[derive(Debug)]
pub struct ProjectionTestHarness<H, V> {
    handler: H,
    store: InMemoryViewStore<V>,
    next_position: u64,
}

impl<H, V: Clone> ProjectionTestHarness<H, V> {
    /// Create a harness around `handler`, observing `store`.
    ///
    /// `store` must be (a clone of) the store the handler writes to.
    #[must_use]
    pub const fn new(handler: H, store: InMemoryViewStore<V>) -> Self {
        Self {
            handler,
            store,
            next_position: 0,
        }
    }

    /// Deliver `events` to the handler as one unit.
    ///
    /// # Errors
    ///
    /// Returns the handler's error.
    pub async fn given_events<E>(&mut self, events: Vec<E>) -> Result<&mut Self>
    where
        H: EventHandler<E>,
    {
        let envelopes: Vec<EventEnvelope<E>> = events
            .into_iter()
            .map(|event| {
                let envelope = test_envelope(event, self.next_position);
                self.next_position += 1;
                envelope
            })
            .collect();

        self.handler.handle(&envelopes).await?;
        Ok(self)
    }

    /// Deliver a single event.
    ///
    /// # Errors
    ///
    /// Returns the handler's error.
    pub async fn given_event<E>(&mut self, event: E) -> Result<&mut Self>
    where
        H: EventHandler<E>,
    {
        self.given_events(vec![event]).await
    }

    /// Current content of view `id`.
    #[must_use]
    pub fn view(&self, id: &str) -> Option<V> {
        self.store.get(id)
    }

    /// Assert that view `id` exists.
    ///
    /// # Panics
    ///
    /// Panics if the view is missing (this is a test assertion).
    #[allow(clippy::panic)] // Intentional panic for test assertions
    pub fn then_contains(&self, id: &str) -> &Self {
        assert!(
            self.store.contains(id),
            "Expected view store to contain '{id}', but it was not found"
        );
        self
    }

    /// Assert that view `id` does not exist.
    ///
    /// # Panics
    ///
    /// Panics if the view exists (this is a test assertion).
    #[allow(clippy::panic)] // Intentional panic for test assertions
    pub fn then_not_contains(&self, id: &str) -> &Self {
        assert!(
            !self.store.contains(id),
            "Expected view store to NOT contain '{id}', but it was found"
        );
        self
    }

    /// The observed store.
    #[must_use]
    pub const fn store(&self) -> &InMemoryViewStore<V> {
        &self.store
    }

    /// The handler under test.
    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::RecordingHandler;

    #[tokio::test]
    async fn positions_keep_increasing_across_calls() {
        let handler = RecordingHandler::<&str>::new("recorder");
        let mut harness = ProjectionTestHarness::new(handler, InMemoryViewStore::<()>::new());

        harness.given_events(vec!["a", "b"]).await.unwrap();
        harness.given_event("c").await.unwrap();

        assert_eq!(harness.handler().positions(), vec![0, 1, 2]);
        assert_eq!(harness.handler().units().len(), 2);
        harness.then_not_contains("a");
    }
}
