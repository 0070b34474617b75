//! Catch-up subscription runner.
//!
//! A [`SubscriptionRunner`] keeps one consumer in step with the log:
//!
//! 1. Load the checkpoint of its subscription id
//! 2. Subscribe to the log strictly after the checkpointed position
//! 3. Decode each record through the [`EventTypeMapper`] and hand units of
//!    envelopes to every [`EventHandler`], in log order
//! 4. Store the position of the last handled envelope with compare-and-swap
//!
//! When the log subscription drops, a handler fails or a checkpoint cannot be
//! stored, the runner waits `resubscribe_delay` and starts again from step 1.
//! Everything after the stored checkpoint is delivered again, so handlers must be
//! idempotent.
//!
//! ```text
//!  Idle ──► Subscribing ──► Streaming ──► Dropped ──► Resubscribing ─┐
//!                               ▲                                    │
//!                               └────────────────────────────────────┘
//!  any state ── stop() ──► Stopped
//! ```
//!
//! # Example
//!
//! ```ignore
//! let (runner, handle) = SubscriptionRunner::builder()
//!     .config(&SubscriptionConfig::from_env()?)
//!     .event_log(log)
//!     .checkpoint_store(checkpoints)
//!     .type_mapper(Arc::new(mapper))
//!     .handler(Arc::new(projection_handler))
//!     .build()?;
//!
//! let task = tokio::spawn(runner.run());
//! // ...
//! handle.stop();
//! task.await?;
//! ```

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_RESUBSCRIBE_DELAY, SubscriptionConfig};
use crate::guard::ResubscriptionGuard;
use catchup_core::checkpoint::{CHECKPOINT_EVENT_TYPE, Checkpoint, CheckpointStore, StoreResult};
use catchup_core::envelope::EventEnvelope;
use catchup_core::event::{EventError, RecordedEvent};
use catchup_core::event_log::{EventLog, EventLogError, RecordStream};
use catchup_core::projection::{EventHandler, ProjectionError, Result};
use catchup_core::type_mapper::EventTypeMapper;
use futures::{FutureExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

/// Lifecycle of a [`SubscriptionRunner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// Built, not yet running.
    Idle,
    /// Loading the checkpoint and opening the log subscription.
    Subscribing,
    /// Delivering records.
    Streaming,
    /// The subscription ended abnormally.
    Dropped,
    /// Waiting to subscribe again.
    Resubscribing,
    /// Cancelled; terminal.
    Stopped,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Dropped => "dropped",
            Self::Resubscribing => "resubscribing",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a streaming session ended.
enum SessionEnd {
    Stopped,
    Dropped(String),
}

/// Delivers log records to handlers and checkpoints progress.
///
/// Built with [`SubscriptionRunner::builder`]; consumed by [`run`](Self::run).
pub struct SubscriptionRunner<E> {
    subscription_id: String,
    log: Arc<dyn EventLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    mapper: Arc<EventTypeMapper<E>>,
    handlers: Vec<Arc<dyn EventHandler<E>>>,
    batch_size: usize,
    resubscribe_delay: Duration,
    guard: ResubscriptionGuard,
    state: watch::Sender<SubscriptionState>,
    checkpoint: watch::Sender<Checkpoint>,
    shutdown: watch::Receiver<bool>,
}

impl<E> fmt::Debug for SubscriptionRunner<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRunner")
            .field("subscription_id", &self.subscription_id)
            .field("handlers", &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>())
            .field("batch_size", &self.batch_size)
            .field("resubscribe_delay", &self.resubscribe_delay)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<E> SubscriptionRunner<E>
where
    E: Send + Sync + 'static,
{
    /// Start building a runner.
    #[must_use]
    pub fn builder() -> SubscriptionRunnerBuilder<E> {
        SubscriptionRunnerBuilder::default()
    }

    /// Checkpoint key of this runner.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Run until [`SubscriptionHandle::stop`] is called.
    ///
    /// Failures never end the loop: they are logged, and the runner resubscribes
    /// from the last stored checkpoint after `resubscribe_delay`.
    pub async fn run(mut self) {
        tracing::info!(
            subscription_id = %self.subscription_id,
            handlers = self.handlers.len(),
            batch_size = self.batch_size,
            "Starting subscription"
        );
        self.state.send_replace(SubscriptionState::Subscribing);

        while !self.is_stopped() {
            match self.subscribe().await {
                Ok(Some((checkpoint, stream))) => {
                    self.state.send_replace(SubscriptionState::Streaming);
                    match self.stream(stream, checkpoint).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::Dropped(reason) => {
                            tracing::warn!(
                                subscription_id = %self.subscription_id,
                                reason = %reason,
                                "Subscription dropped"
                            );
                            self.state.send_replace(SubscriptionState::Dropped);
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!(
                        subscription_id = %self.subscription_id,
                        "Another resubscription is in flight"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %self.subscription_id,
                        error = %e,
                        "Failed to subscribe"
                    );
                    self.state.send_replace(SubscriptionState::Dropped);
                }
            }

            self.state.send_replace(SubscriptionState::Resubscribing);
            if !self.pause().await {
                break;
            }
        }

        self.state.send_replace(SubscriptionState::Stopped);
        tracing::info!(subscription_id = %self.subscription_id, "Subscription stopped");
    }

    /// Load the checkpoint and open the log subscription after it.
    ///
    /// `Ok(None)` when another runner holds the resubscription slot.
    async fn subscribe(&self) -> Result<Option<(Checkpoint, RecordStream)>> {
        let Some(_permit) = self.guard.try_acquire(&self.subscription_id) else {
            return Ok(None);
        };

        let checkpoint = self.checkpoints.load(&self.subscription_id).await?;
        self.checkpoint.send_replace(checkpoint);

        let stream = self.log.subscribe_from(checkpoint.position).await?;
        tracing::info!(
            subscription_id = %self.subscription_id,
            checkpoint = %checkpoint,
            "Subscribed to log"
        );
        Ok(Some((checkpoint, stream)))
    }

    /// Deliver records until the subscription drops or the runner is stopped.
    async fn stream(&mut self, mut records: RecordStream, mut checkpoint: Checkpoint) -> SessionEnd {
        loop {
            let next = tokio::select! {
                biased;
                () = cancelled(&mut self.shutdown) => return SessionEnd::Stopped,
                next = records.next() => next,
            };

            let mut unit = Vec::with_capacity(self.batch_size);
            let mut dropped = self.accept(next, &mut unit);

            // Extend the unit with records that are already available, without waiting.
            while dropped.is_none() && unit.len() < self.batch_size {
                match records.next().now_or_never() {
                    Some(next) => dropped = self.accept(next, &mut unit),
                    None => break,
                }
            }

            if !unit.is_empty() {
                match self.process(&unit, checkpoint).await {
                    Ok(next) => {
                        checkpoint = next;
                        self.checkpoint.send_replace(next);
                    }
                    Err(e) => return SessionEnd::Dropped(e.to_string()),
                }
            }

            if let Some(reason) = dropped {
                return SessionEnd::Dropped(reason);
            }
        }
    }

    /// Add the next stream item to `unit`; returns the drop reason if the stream is done.
    fn accept(
        &self,
        next: Option<std::result::Result<RecordedEvent, EventLogError>>,
        unit: &mut Vec<EventEnvelope<E>>,
    ) -> Option<String> {
        match next {
            None => Some("log subscription ended".to_string()),
            Some(Err(e)) => Some(e.to_string()),
            Some(Ok(record)) => {
                if let Some(envelope) = self.decode(&record) {
                    unit.push(envelope);
                }
                None
            }
        }
    }

    /// Decode a record, or `None` if it must be skipped.
    fn decode(&self, record: &RecordedEvent) -> Option<EventEnvelope<E>> {
        if record.event_type == CHECKPOINT_EVENT_TYPE {
            return None;
        }
        // Fieldless events encode to zero bytes, so only unregistered empty records are markers.
        if record.is_empty() && !self.mapper.is_registered(&record.event_type) {
            tracing::trace!(log_position = record.log_position, "Skipping empty record");
            return None;
        }

        match self.mapper.decode(record) {
            Ok(data) => {
                let envelope = EventEnvelope::new(data, record);
                tracing::debug!(
                    subscription_id = %self.subscription_id,
                    event_type = %envelope.event_type(),
                    log_position = envelope.log_position(),
                    correlation_id = ?envelope.metadata.trace.correlation_id,
                    "Delivering event"
                );
                Some(envelope)
            }
            Err(EventError::UnknownEventType(event_type)) => {
                tracing::warn!(
                    subscription_id = %self.subscription_id,
                    event_type = %event_type,
                    log_position = record.log_position,
                    "Unknown event type, skipping"
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    subscription_id = %self.subscription_id,
                    error = %e,
                    log_position = record.log_position,
                    "Failed to decode event, skipping"
                );
                None
            }
        }
    }

    /// Hand `unit` to every handler, then checkpoint its last position.
    async fn process(&self, unit: &[EventEnvelope<E>], previous: Checkpoint) -> Result<Checkpoint> {
        let (Some(first), Some(last)) = (unit.first(), unit.last()) else {
            return Ok(previous);
        };
        let position = last.log_position();
        let span = tracing::info_span!(
            "unit",
            subscription_id = %self.subscription_id,
            first_position = first.log_position(),
            last_position = position,
            size = unit.len(),
        );

        async move {
            for handler in &self.handlers {
                handler.handle(unit).await.map_err(|e| {
                    tracing::error!(handler = handler.name(), error = %e, "Handler failed");
                    e
                })?;
            }
            self.advance(position, previous).await
        }
        .instrument(span)
        .await
    }

    /// Store `position` on top of `previous`, reloading once on a lost race.
    async fn advance(&self, position: u64, previous: Checkpoint) -> Result<Checkpoint> {
        let id = self.subscription_id.as_str();

        match self.checkpoints.store(id, position, previous).await? {
            StoreResult::Success(stored) => {
                tracing::debug!(checkpoint = %stored, "Checkpoint stored");
                return Ok(stored);
            }
            StoreResult::Ignored => {
                tracing::debug!(position, previous = %previous, "Checkpoint behind, ignored");
                return Ok(previous);
            }
            StoreResult::Mismatch => {}
        }

        let current = self.checkpoints.load(id).await?;
        tracing::warn!(
            position,
            expected = %previous,
            current = %current,
            "Checkpoint moved concurrently, reloaded"
        );
        if current.position.is_some_and(|stored| stored >= position) {
            return Ok(current);
        }

        match self.checkpoints.store(id, position, current).await? {
            StoreResult::Success(stored) => Ok(stored),
            StoreResult::Ignored => Ok(current),
            StoreResult::Mismatch => Err(ProjectionError::Checkpoint(format!(
                "checkpoint of '{id}' is being moved concurrently"
            ))),
        }
    }

    /// Wait before the next attempt; `false` if stopped meanwhile.
    async fn pause(&mut self) -> bool {
        if self.is_stopped() {
            return false;
        }
        let delay = self.resubscribe_delay;
        let stopped = tokio::select! {
            () = cancelled(&mut self.shutdown) => true,
            () = tokio::time::sleep(delay) => false,
        };
        !stopped && !self.is_stopped()
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Resolves once a stop is requested. A dropped handle never cancels.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Builder for [`SubscriptionRunner`].
///
/// The event log, checkpoint store, type mapper, subscription id and at least one
/// handler are required; [`build`](Self::build) fails otherwise.
pub struct SubscriptionRunnerBuilder<E> {
    subscription_id: Option<String>,
    log: Option<Arc<dyn EventLog>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    mapper: Option<Arc<EventTypeMapper<E>>>,
    handlers: Vec<Arc<dyn EventHandler<E>>>,
    batch_size: usize,
    resubscribe_delay: Duration,
    guard: Option<ResubscriptionGuard>,
}

impl<E> Default for SubscriptionRunnerBuilder<E> {
    fn default() -> Self {
        Self {
            subscription_id: None,
            log: None,
            checkpoints: None,
            mapper: None,
            handlers: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
            guard: None,
        }
    }
}

impl<E> SubscriptionRunnerBuilder<E>
where
    E: Send + Sync + 'static,
{
    /// Take id, batch size and delay from `config`.
    #[must_use]
    pub fn config(mut self, config: &SubscriptionConfig) -> Self {
        self.subscription_id = Some(config.subscription_id.clone());
        self.batch_size = config.batch_size;
        self.resubscribe_delay = config.resubscribe_delay;
        self
    }

    /// Set the checkpoint key.
    #[must_use]
    pub fn subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    /// Set the log to subscribe to.
    #[must_use]
    pub fn event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Set the checkpoint backend.
    #[must_use]
    pub fn checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Set the mapper resolving wire type names.
    #[must_use]
    pub fn type_mapper(mut self, mapper: Arc<EventTypeMapper<E>>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Add a handler. Handlers run in the order they were added.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler<E>>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Maximum envelopes per unit of work.
    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Pause between a drop and the next subscribe attempt.
    #[must_use]
    pub const fn resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Use `guard` instead of the process-wide [`ResubscriptionGuard::shared`].
    #[must_use]
    pub fn guard(mut self, guard: ResubscriptionGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Build the runner and the handle that observes and stops it.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] when a collaborator is missing,
    /// no handler was added, the id is empty or the batch size is zero.
    pub fn build(self) -> Result<(SubscriptionRunner<E>, SubscriptionHandle)> {
        let missing = |what: &str| ProjectionError::Configuration(format!("{what} is required"));

        let subscription_id = self
            .subscription_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| missing("subscription id"))?;
        let log = self.log.ok_or_else(|| missing("event log"))?;
        let checkpoints = self.checkpoints.ok_or_else(|| missing("checkpoint store"))?;
        let mapper = self.mapper.ok_or_else(|| missing("type mapper"))?;
        if self.handlers.is_empty() {
            return Err(missing("at least one handler"));
        }
        if self.batch_size == 0 {
            return Err(ProjectionError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Idle);
        let (checkpoint_tx, checkpoint_rx) = watch::channel(Checkpoint::NONE);

        let handle = SubscriptionHandle {
            subscription_id: subscription_id.clone(),
            shutdown: shutdown_tx,
            state: state_rx,
            checkpoint: checkpoint_rx,
        };
        let runner = SubscriptionRunner {
            subscription_id,
            log,
            checkpoints,
            mapper,
            handlers: self.handlers,
            batch_size: self.batch_size,
            resubscribe_delay: self.resubscribe_delay,
            guard: self.guard.unwrap_or_else(ResubscriptionGuard::shared),
            state: state_tx,
            checkpoint: checkpoint_tx,
            shutdown: shutdown_rx,
        };
        Ok((runner, handle))
    }
}

/// Observes and stops a [`SubscriptionRunner`].
///
/// Dropping the handle does not stop the runner.
#[derive(Debug)]
pub struct SubscriptionHandle {
    subscription_id: String,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<SubscriptionState>,
    checkpoint: watch::Receiver<Checkpoint>,
}

impl SubscriptionHandle {
    /// Checkpoint key of the runner.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Request a stop. In-flight handler calls finish; nothing further is delivered.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Last checkpoint loaded or stored by the runner.
    #[must_use]
    pub fn last_checkpoint(&self) -> Checkpoint {
        *self.checkpoint.borrow()
    }

    /// Wait until the runner reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Other`] if the runner is gone before reaching it.
    pub async fn wait_for_state(&self, state: SubscriptionState) -> Result<()> {
        let mut receiver = self.state.clone();
        let reached = receiver.wait_for(|current| *current == state).await.is_ok();
        if reached {
            Ok(())
        } else {
            Err(ProjectionError::Other(format!(
                "runner of '{}' ended before reaching {state}",
                self.subscription_id
            )))
        }
    }

    /// Wait until a checkpoint at or after `position` has been stored.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Other`] if the runner is gone before reaching it.
    pub async fn wait_for_position(&self, position: u64) -> Result<Checkpoint> {
        let mut receiver = self.checkpoint.clone();
        let reached = receiver
            .wait_for(|checkpoint| checkpoint.position.is_some_and(|p| p >= position))
            .await
            .map(|checkpoint| *checkpoint)
            .ok();
        reached.ok_or_else(|| {
            ProjectionError::Other(format!(
                "runner of '{}' ended before checkpointing {position}",
                self.subscription_id
            ))
        })
    }
}
