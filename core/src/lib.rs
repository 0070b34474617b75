//! # Catchup Core
//!
//! Core traits and types for keeping read models consistent with an append-only event log.
//!
//! The log is an external collaborator, and so is the read-model store. This crate
//! defines the boundary to both and the types that travel between them:
//!
//! - **Type resolution**: [`type_mapper::EventTypeMapper`] turns wire type names into a
//!   closed event union and back; [`stream::StreamNameMapper`] derives stream and
//!   subscription ids
//! - **Delivery**: [`envelope::EventEnvelope`] carries a decoded event plus ids, positions
//!   and trace context
//! - **Progress**: [`checkpoint::CheckpointStore`] persists the last processed position per
//!   subscription with compare-and-swap
//! - **Consumption**: [`projection::EventHandler`], [`projection::ViewProjection`] and
//!   [`projection::ViewStore`]
//!
//! ## Guarantees
//!
//! - Ordered delivery per subscription
//! - At-least-once: checkpoints advance only after handlers succeed
//! - Conflicts detected after the fact (CAS), never by locking
//!
//! ## Example
//!
//! ```ignore
//! use catchup_core::prelude::*;
//!
//! let mapper = EventTypeMapper::<CartEvent>::builder()
//!     .register::<CartOpened>()
//!     .register::<ItemAdded>()
//!     .build()?;
//!
//! let record = log.read_stream(stream_id, None).await?.remove(0);
//! let envelope = EventEnvelope::new(mapper.decode(&record)?, &record);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod checkpoint;
pub mod envelope;
pub mod event;
pub mod event_log;
pub mod projection;
pub mod stream;
pub mod type_mapper;

/// Commonly used types.
pub mod prelude {
    pub use crate::checkpoint::{Checkpoint, CheckpointStore, StoreResult};
    pub use crate::envelope::{EventEnvelope, EventMetadata, TraceMetadata};
    pub use crate::event::{EventError, RecordedEvent, SerializedEvent};
    pub use crate::event_log::{EventLog, EventLogError, RecordStream};
    pub use crate::projection::{
        EventHandler, ProjectionError, Route, ViewChange, ViewProjection, ViewRule, ViewStore,
    };
    pub use crate::stream::{StreamId, StreamNameMapper, Version};
    pub use crate::type_mapper::EventTypeMapper;
}
