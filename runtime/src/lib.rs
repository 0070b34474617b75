//! # Catchup Runtime
//!
//! Runs catch-up subscriptions: each [`SubscriptionRunner`] reads the log from its last
//! checkpoint, hands decoded envelopes to its handlers in log order, and records
//! progress in a [`CheckpointStore`](catchup_core::checkpoint::CheckpointStore).
//!
//! ## Core Components
//!
//! - **Subscription runner**: the delivery loop and its state machine
//! - **Resubscription guard**: one reconnect attempt per subscription id at a time
//! - **Retry**: exponential backoff for transient failures
//! - **Config**: environment-driven subscription settings
//!
//! ## Example
//!
//! ```ignore
//! use catchup_runtime::{SubscriptionConfig, SubscriptionRunner};
//!
//! let (runner, handle) = SubscriptionRunner::builder()
//!     .config(&SubscriptionConfig::from_env()?)
//!     .event_log(log)
//!     .checkpoint_store(checkpoints)
//!     .type_mapper(mapper)
//!     .handler(handler)
//!     .build()?;
//!
//! tokio::spawn(runner.run());
//! ```

/// Subscription configuration
pub mod config;

/// Resubscription guard
pub mod guard;

/// Retry logic with exponential backoff
pub mod retry;

/// Catch-up subscription runner
pub mod subscription;

pub use config::SubscriptionConfig;
pub use guard::{ResubscriptionGuard, ResubscriptionPermit};
pub use retry::{RetryPolicy, retry_if};
pub use subscription::{
    SubscriptionHandle, SubscriptionRunner, SubscriptionRunnerBuilder, SubscriptionState,
};
