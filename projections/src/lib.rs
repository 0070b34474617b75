//! Projection implementations for catch-up subscriptions.
//!
//! # Overview
//!
//! This crate provides the consumers and backends a subscription runner is wired to:
//! - **Batch projection**: [`BatchProjectionHandler`] folds units of envelopes into view
//!   rows with one bulk load and one commit
//! - **Checkpoints**: in-memory, event-log and `PostgreSQL` implementations of
//!   [`CheckpointStore`](catchup_core::checkpoint::CheckpointStore)
//! - **`PostgreSQL` views**: [`PostgresViewStore`] keeps rows as `JSONB`
//!
//! # Choosing a checkpoint store
//!
//! | Store | Durable | Revision |
//! |-------|---------|----------|
//! | [`InMemoryCheckpointStore`] | no | stored position |
//! | [`EventLogCheckpointStore`] | yes, in the log | checkpoint stream version |
//! | [`PostgresCheckpointStore`] | yes, in the read database | stored position |
//!
//! Keeping checkpoints in the read database lets a deployment put the view rows and the
//! checkpoint in the same database, next to each other.
//!
//! # Example
//!
//! ```ignore
//! use catchup_projections::{BatchProjectionHandler, PostgresCheckpointStore, PostgresViewStore};
//!
//! let pool = PostgresConfig::from_env().connect().await?;
//! let handler = BatchProjectionHandler::new(
//!     CartDetailsProjection,
//!     PostgresViewStore::new(pool.clone(), "cart_details"),
//! );
//!
//! let (runner, handle) = SubscriptionRunner::builder()
//!     .subscription_id("cart_details")
//!     .event_log(log)
//!     .checkpoint_store(Arc::new(PostgresCheckpointStore::new(pool)))
//!     .type_mapper(mapper)
//!     .handler(Arc::new(handler))
//!     .build()?;
//! ```

pub mod batch;
pub mod event_log;
pub mod memory;
pub mod postgres;

// Re-export main types for convenience
pub use batch::BatchProjectionHandler;
pub use event_log::EventLogCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use postgres::{PostgresCheckpointStore, PostgresConfig, PostgresViewStore};
