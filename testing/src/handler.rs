//! Handler that records what it was given.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use catchup_core::envelope::EventEnvelope;
use catchup_core::projection::{EventHandler, HandlerFuture, ProjectionError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// [`EventHandler`] that stores every delivered unit.
///
/// Cloning shares the recording, so keep a clone for assertions and hand the
/// other one to the runner.
#[derive(Debug)]
pub struct RecordingHandler<E> {
    name: String,
    units: Arc<Mutex<Vec<Vec<EventEnvelope<E>>>>>,
    failing: Arc<AtomicUsize>,
}

impl<E> Clone for RecordingHandler<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            units: Arc::clone(&self.units),
            failing: Arc::clone(&self.failing),
        }
    }
}

impl<E: Clone> RecordingHandler<E> {
    /// Create a handler named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            units: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` units fail. Failed units are not recorded.
    pub fn fail_next(&self, count: usize) {
        self.failing.store(count, Ordering::SeqCst);
    }

    /// Delivered units, in delivery order.
    #[must_use]
    pub fn units(&self) -> Vec<Vec<EventEnvelope<E>>> {
        self.units.lock().unwrap().clone()
    }

    /// Delivered envelopes, flattened.
    #[must_use]
    pub fn envelopes(&self) -> Vec<EventEnvelope<E>> {
        self.units.lock().unwrap().iter().flatten().cloned().collect()
    }

    /// Delivered payloads, flattened.
    #[must_use]
    pub fn events(&self) -> Vec<E> {
        self.envelopes().into_iter().map(|envelope| envelope.data).collect()
    }

    /// Log positions of delivered envelopes.
    #[must_use]
    pub fn positions(&self) -> Vec<u64> {
        self.units
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(EventEnvelope::log_position)
            .collect()
    }
}

impl<E> EventHandler<E> for RecordingHandler<E>
where
    E: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(&'a self, envelopes: &'a [EventEnvelope<E>]) -> HandlerFuture<'a> {
        Box::pin(async move {
            let failing = self
                .failing
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ProjectionError::EventProcessing(format!(
                    "{} rejected {} envelope(s)",
                    self.name,
                    envelopes.len()
                )));
            }
            self.units.lock().unwrap().push(envelopes.to_vec());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_envelope;

    #[tokio::test]
    async fn records_units_in_order() {
        let handler = RecordingHandler::new("recorder");

        handler.handle(&[test_envelope("a", 0), test_envelope("b", 1)]).await.unwrap();
        handler.handle(&[test_envelope("c", 2)]).await.unwrap();

        assert_eq!(handler.units().len(), 2);
        assert_eq!(handler.events(), vec!["a", "b", "c"]);
        assert_eq!(handler.positions(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn injected_failure_skips_recording() {
        let handler = RecordingHandler::new("recorder");
        handler.fail_next(1);

        let failed = handler.handle(&[test_envelope(1_u32, 0)]).await;
        assert!(matches!(failed, Err(ProjectionError::EventProcessing(_))));

        handler.handle(&[test_envelope(1_u32, 0)]).await.unwrap();
        assert_eq!(handler.positions(), vec![0]);
    }
}
