//! Batch projection: fold a unit of envelopes into view rows with one load and one commit.
//!
//! For each unit delivered by the subscription runner, [`BatchProjectionHandler`]:
//!
//! 1. keeps the envelopes its [`ViewProjection`] routes, in order
//! 2. loads every distinct target row with a single [`ViewStore::bulk_load`]
//! 3. applies create/evolve rules in log order, several events per row included
//! 4. writes all resulting upserts and deletes with a single [`ViewStore::commit`]
//!
//! Transient storage failures re-run steps 2 to 4 under the configured
//! [`RetryPolicy`]. Once retries are exhausted the error goes back to the runner, which
//! replays the unit later; the fold is recomputed from stored rows, so a replay never
//! applies an event twice to the same row state.

use catchup_core::envelope::EventEnvelope;
use catchup_core::projection::{
    EventHandler, HandlerFuture, ProjectionError, Result, Route, ViewChange, ViewProjection,
    ViewRule, ViewStore,
};
use catchup_runtime::retry::{RetryPolicy, retry_if};
use std::collections::{HashMap, HashSet};

/// [`EventHandler`] that maintains the rows of one [`ViewProjection`].
///
/// # Example
///
/// ```ignore
/// let handler = BatchProjectionHandler::new(CartDetailsProjection, PostgresViewStore::new(pool, "cart_details"))
///     .with_retry_policy(RetryPolicy::builder().max_retries(5).build());
///
/// let (runner, handle) = SubscriptionRunner::builder()
///     .handler(Arc::new(handler))
///     // ...
///     .build()?;
/// ```
#[derive(Debug)]
pub struct BatchProjectionHandler<P, S> {
    projection: P,
    store: S,
    retry: RetryPolicy,
}

impl<P, S> BatchProjectionHandler<P, S>
where
    P: ViewProjection,
    S: ViewStore<P::View>,
{
    /// Create a handler with the default retry policy.
    #[must_use]
    pub fn new(projection: P, store: S) -> Self {
        Self {
            projection,
            store,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy used for load-and-commit.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The projection rules.
    #[must_use]
    pub const fn projection(&self) -> &P {
        &self.projection
    }

    /// The view store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Fold `envelopes` into the store.
    ///
    /// Returns the number of rows written or deleted; `0` when the projection routes
    /// none of the envelopes, in which case the store is not touched.
    ///
    /// # Errors
    ///
    /// Returns the store error once retries are exhausted, or immediately for
    /// non-transient errors.
    pub async fn apply(&self, envelopes: &[EventEnvelope<P::Event>]) -> Result<usize> {
        let routed: Vec<(&EventEnvelope<P::Event>, Route)> = envelopes
            .iter()
            .filter_map(|envelope| {
                self.projection
                    .route(&envelope.data)
                    .map(|route| (envelope, route))
            })
            .collect();

        if routed.is_empty() {
            tracing::trace!(
                projection = self.projection.name(),
                envelopes = envelopes.len(),
                "No routed events in unit"
            );
            return Ok(0);
        }

        let routed = routed.as_slice();
        let written = retry_if(&self.retry, move || self.fold(routed), ProjectionError::is_transient)
            .await?;

        tracing::debug!(
            projection = self.projection.name(),
            events = routed.len(),
            rows = written,
            "Projected unit"
        );
        Ok(written)
    }

    /// One load, fold and commit attempt.
    async fn fold(&self, routed: &[(&EventEnvelope<P::Event>, Route)]) -> Result<usize> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = routed
            .iter()
            .filter(|(_, route)| seen.insert(route.view_id.as_str()))
            .map(|(_, route)| route.view_id.clone())
            .collect();

        let mut rows: HashMap<String, Option<P::View>> = self
            .store
            .bulk_load(&ids, self.projection.eager_load())
            .await?
            .into_iter()
            .map(|(id, view)| (id, Some(view)))
            .collect();

        for (envelope, route) in routed {
            let current = rows.remove(&route.view_id).flatten();
            let next = match route.rule {
                ViewRule::Create => {
                    if current.is_some() {
                        tracing::debug!(
                            projection = self.projection.name(),
                            view_id = %route.view_id,
                            log_position = envelope.log_position(),
                            "Create replaces existing view"
                        );
                    }
                    Some(self.projection.create(envelope))
                }
                ViewRule::Evolve => self.projection.evolve(current.unwrap_or_default(), envelope),
            };
            rows.insert(route.view_id.clone(), next);
        }

        let changes: Vec<ViewChange<P::View>> = ids
            .into_iter()
            .map(|id| match rows.remove(&id).flatten() {
                Some(view) => ViewChange::Upsert { id, view },
                None => ViewChange::Delete { id },
            })
            .collect();

        let written = changes.len();
        self.store.commit(changes).await?;
        Ok(written)
    }
}

impl<P, S> EventHandler<P::Event> for BatchProjectionHandler<P, S>
where
    P: ViewProjection,
    S: ViewStore<P::View>,
{
    fn name(&self) -> &str {
        self.projection.name()
    }

    fn handle<'a>(&'a self, envelopes: &'a [EventEnvelope<P::Event>]) -> HandlerFuture<'a> {
        Box::pin(async move { self.apply(envelopes).await.map(|_| ()) })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use catchup_testing::{InMemoryViewStore, test_envelope};
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    enum Counter {
        Opened(&'static str),
        Added(&'static str, u32),
        Closed(&'static str),
        Unrelated,
    }

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Total {
        value: u32,
        events: u32,
    }

    struct Totals;

    impl ViewProjection for Totals {
        type Event = Counter;
        type View = Total;

        fn name(&self) -> &str {
            "totals"
        }

        fn route(&self, event: &Counter) -> Option<Route> {
            match event {
                Counter::Opened(id) => Some(Route::create(*id)),
                Counter::Added(id, _) | Counter::Closed(id) => Some(Route::evolve(*id)),
                Counter::Unrelated => None,
            }
        }

        fn create(&self, _envelope: &EventEnvelope<Counter>) -> Total {
            Total { value: 0, events: 1 }
        }

        fn evolve(&self, view: Total, envelope: &EventEnvelope<Counter>) -> Option<Total> {
            match envelope.data {
                Counter::Added(_, amount) => Some(Total {
                    value: view.value + amount,
                    events: view.events + 1,
                }),
                Counter::Closed(_) => None,
                Counter::Opened(_) | Counter::Unrelated => Some(view),
            }
        }

        fn eager_load(&self) -> &[&'static str] {
            &["lines"]
        }
    }

    fn unit(events: Vec<Counter>) -> Vec<EventEnvelope<Counter>> {
        events
            .into_iter()
            .enumerate()
            .map(|(position, event)| test_envelope(event, position as u64))
            .collect()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    #[tokio::test]
    async fn folds_several_events_per_row_with_one_load() {
        let store = InMemoryViewStore::new();
        let handler = BatchProjectionHandler::new(Totals, store.clone());

        let written = handler
            .apply(&unit(vec![
                Counter::Opened("a"),
                Counter::Added("a", 2),
                Counter::Opened("b"),
                Counter::Added("a", 3),
            ]))
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.get("a"), Some(Total { value: 5, events: 3 }));
        assert_eq!(store.get("b"), Some(Total { value: 0, events: 1 }));

        let loads = store.load_calls();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(loads[0].related, vec!["lines"]);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn evolve_returning_none_deletes_the_row() {
        let store = InMemoryViewStore::new();
        store.insert("a", Total { value: 9, events: 4 });
        let handler = BatchProjectionHandler::new(Totals, store.clone());

        handler.apply(&unit(vec![Counter::Closed("a")])).await.unwrap();

        assert!(!store.contains("a"));
    }

    #[tokio::test]
    async fn evolve_on_missing_row_starts_from_default() {
        let store = InMemoryViewStore::new();
        let handler = BatchProjectionHandler::new(Totals, store.clone());

        handler.apply(&unit(vec![Counter::Added("late", 4)])).await.unwrap();

        assert_eq!(store.get("late"), Some(Total { value: 4, events: 1 }));
    }

    #[tokio::test]
    async fn create_replaces_an_existing_row() {
        let store = InMemoryViewStore::new();
        store.insert("a", Total { value: 9, events: 4 });
        let handler = BatchProjectionHandler::new(Totals, store.clone());

        handler.apply(&unit(vec![Counter::Opened("a")])).await.unwrap();

        assert_eq!(store.get("a"), Some(Total { value: 0, events: 1 }));
    }

    #[tokio::test]
    async fn unrouted_units_do_not_touch_the_store() {
        let store = InMemoryViewStore::<Total>::new();
        let handler = BatchProjectionHandler::new(Totals, store.clone());

        let written = handler.apply(&unit(vec![Counter::Unrelated])).await.unwrap();

        assert_eq!(written, 0);
        assert!(store.load_calls().is_empty());
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn transient_commit_failure_is_retried_as_a_unit() {
        let store = InMemoryViewStore::new();
        store.fail_next_commits(1);
        let handler =
            BatchProjectionHandler::new(Totals, store.clone()).with_retry_policy(fast_retry());

        handler
            .apply(&unit(vec![Counter::Opened("a"), Counter::Added("a", 1)]))
            .await
            .unwrap();

        assert_eq!(store.get("a"), Some(Total { value: 1, events: 2 }));
        assert_eq!(store.load_calls().len(), 2);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let store = InMemoryViewStore::<Total>::new();
        store.fail_next_commits(10);
        let handler =
            BatchProjectionHandler::new(Totals, store.clone()).with_retry_policy(fast_retry());

        let result = handler.handle(&unit(vec![Counter::Opened("a")])).await;

        assert!(matches!(result, Err(ProjectionError::Storage(_))));
        assert!(store.is_empty());
    }
}
