//! Bidirectional mapping between Rust event types and wire type names.
//!
//! The set of event types a consumer understands is closed and known at startup.
//! Each type is registered once on an [`EventTypeMapperBuilder`]; the resulting
//! [`EventTypeMapper`] holds two injective maps (name -> decoder, type -> name) and
//! is never mutated afterwards, so lookups from many runners need no locking.
//!
//! Decoding produces the consumer's event union `E`: every registered type `T`
//! must convert `Into<E>`, which is usually one enum variant per type.
//!
//! # Example
//!
//! ```
//! use catchup_core::type_mapper::EventTypeMapper;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct CartOpened { cart_id: String }
//!
//! #[derive(Debug)]
//! enum CartEvent { Opened(CartOpened) }
//!
//! impl From<CartOpened> for CartEvent {
//!     fn from(e: CartOpened) -> Self { Self::Opened(e) }
//! }
//!
//! let mapper = EventTypeMapper::<CartEvent>::builder()
//!     .register_as::<CartOpened>("CartOpened")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(mapper.name_of::<CartOpened>(), Some("CartOpened"));
//! assert!(mapper.is_registered("CartOpened"));
//! ```

use crate::event::{EventError, RecordedEvent, SerializedEvent, from_bytes, to_bytes};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Decodes the payload of one registered wire type into the event union.
type Decoder<E> = Arc<dyn Fn(&str, &[u8]) -> Result<E, EventError> + Send + Sync>;

/// Default wire name of `T`: its full type path with `::` flattened to `_`.
///
/// ```
/// use catchup_core::type_mapper::default_type_name;
///
/// assert_eq!(default_type_name::<String>(), "alloc_string_String");
/// ```
#[must_use]
pub fn default_type_name<T: ?Sized>() -> String {
    std::any::type_name::<T>().replace("::", "_")
}

/// Immutable registry of the event types a consumer can decode.
pub struct EventTypeMapper<E> {
    decoders: HashMap<String, Decoder<E>>,
    names: HashMap<TypeId, String>,
}

impl<E> EventTypeMapper<E> {
    /// Start a registration list.
    #[must_use]
    pub fn builder() -> EventTypeMapperBuilder<E> {
        EventTypeMapperBuilder {
            registrations: Vec::new(),
        }
    }

    /// Wire name registered for `T`, if any.
    #[must_use]
    pub fn name_of<T: 'static>(&self) -> Option<&str> {
        self.names.get(&TypeId::of::<T>()).map(String::as_str)
    }

    /// Whether `event_type` resolves to a registered type.
    #[must_use]
    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode a recorded event into the union.
    ///
    /// # Errors
    ///
    /// - [`EventError::UnknownEventType`] if the wire name is not registered
    /// - [`EventError::DeserializationError`] if the payload does not decode
    pub fn decode(&self, record: &RecordedEvent) -> Result<E, EventError> {
        let decoder = self
            .decoders
            .get(&record.event_type)
            .ok_or_else(|| EventError::UnknownEventType(record.event_type.clone()))?;
        decoder(&record.event_type, &record.data)
    }

    /// Serialize `event` under its registered wire name.
    ///
    /// # Errors
    ///
    /// - [`EventError::UnregisteredType`] if `T` was never registered
    /// - [`EventError::SerializationError`] if the payload cannot be encoded
    pub fn encode<T: Serialize + 'static>(
        &self,
        event: &T,
        metadata: Option<serde_json::Value>,
    ) -> Result<SerializedEvent, EventError> {
        let name = self
            .name_of::<T>()
            .ok_or(EventError::UnregisteredType(std::any::type_name::<T>()))?;
        Ok(SerializedEvent::new(name.to_string(), to_bytes(event)?, metadata))
    }
}

impl<E> Clone for EventTypeMapper<E> {
    fn clone(&self) -> Self {
        Self {
            decoders: self.decoders.clone(),
            names: self.names.clone(),
        }
    }
}

impl<E> fmt::Debug for EventTypeMapper<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("EventTypeMapper").field("types", &names).finish()
    }
}

struct Registration<E> {
    type_id: TypeId,
    name: String,
    decoder: Decoder<E>,
}

/// Collects registrations for an [`EventTypeMapper`].
pub struct EventTypeMapperBuilder<E> {
    registrations: Vec<Registration<E>>,
}

impl<E: 'static> EventTypeMapperBuilder<E> {
    /// Register `T` under its default wire name ([`default_type_name`]).
    #[must_use]
    pub fn register<T>(self) -> Self
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        self.register_as::<T>(default_type_name::<T>())
    }

    /// Register `T` under an explicit wire name.
    ///
    /// Registering the same type twice keeps the last name, so an override placed after
    /// a default registration replaces it.
    #[must_use]
    pub fn register_as<T>(mut self, name: impl Into<String>) -> Self
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        let type_id = TypeId::of::<T>();
        self.registrations.retain(|r| r.type_id != type_id);
        self.registrations.push(Registration {
            type_id,
            name: name.into(),
            decoder: Arc::new(|event_type: &str, bytes: &[u8]| {
                from_bytes::<T>(event_type, bytes).map(Into::into)
            }),
        });
        self
    }

    /// Freeze the registrations.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DuplicateEventType`] if two types claim the same wire name.
    pub fn build(self) -> Result<EventTypeMapper<E>, EventError> {
        let mut decoders = HashMap::with_capacity(self.registrations.len());
        let mut names = HashMap::with_capacity(self.registrations.len());

        for registration in self.registrations {
            if decoders.contains_key(&registration.name) {
                return Err(EventError::DuplicateEventType(registration.name));
            }
            names.insert(registration.type_id, registration.name.clone());
            decoders.insert(registration.name, registration.decoder);
        }

        Ok(EventTypeMapper { decoders, names })
    }
}
