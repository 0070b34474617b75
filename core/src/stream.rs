//! Stream identification, versioning, and stream-name derivation.
//!
//! - [`StreamId`]: names one logical stream in the log
//! - [`Version`]: number of events in a stream, used as the optimistic-concurrency guard on append
//! - [`StreamNameMapper`]: deterministic `StreamId` and subscription-id derivation from Rust types

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `StreamId` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream ID: {0}")]
pub struct ParseStreamIdError(String);

/// Identifier of one stream in the log, e.g. `"shop_ShoppingCart-42"` or `"checkpoint_orders"`.
///
/// `FromStr` validates (rejects empty strings); `new()` and `From` trust their input.
///
/// ```
/// use catchup_core::stream::StreamId;
///
/// let stream_id = StreamId::new("shop_ShoppingCart-42");
/// assert_eq!(stream_id.as_str(), "shop_ShoppingCart-42");
///
/// let parsed: StreamId = "checkpoint_orders".parse().unwrap();
/// assert_eq!(parsed, StreamId::new("checkpoint_orders"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Create a new `StreamId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the stream ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `StreamId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseStreamIdError("Stream ID cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Stream version for optimistic concurrency control.
///
/// A version is the number of events ever appended to a stream: a new stream is at
/// [`Version::INITIAL`], and appending `n` events to a stream at `v` yields `v + n`.
/// The zero-based stream position of the last event is therefore `version - 1`.
///
/// ```
/// use catchup_core::stream::Version;
///
/// let v0 = Version::INITIAL;
/// assert_eq!(v0.next(), Version::new(1));
/// assert_eq!(Version::after_position(4), Version::new(5));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of a stream that has never been written.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Version of a stream whose last event sits at `stream_position`.
    #[must_use]
    pub const fn after_position(stream_position: u64) -> Self {
        Self(stream_position + 1)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl std::ops::Add<u64> for Version {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// Separator between a tenant prefix and the category.
const TENANT_SEPARATOR: char = '_';
/// Separator between the category and the entity id.
const ID_SEPARATOR: char = '-';

/// Derives stream ids and subscription ids from Rust types.
///
/// The category of a type is `{module}_{TypeName}`, where `module` is the first path
/// segment of [`std::any::type_name`] (the owning crate) and `TypeName` the last one,
/// generics stripped. Overrides registered on the builder win permanently.
///
/// The mapper is immutable once built: share it with `Arc` between runners.
///
/// ```
/// use catchup_core::stream::StreamNameMapper;
///
/// struct ShoppingCart;
///
/// let mapper = StreamNameMapper::builder()
///     .with_category::<ShoppingCart>("shop_Cart")
///     .build();
///
/// assert_eq!(mapper.stream_id::<ShoppingCart>("42", None).as_str(), "shop_Cart-42");
/// assert_eq!(
///     mapper.stream_id::<ShoppingCart>("42", Some("acme")).as_str(),
///     "acme_shop_Cart-42",
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct StreamNameMapper {
    overrides: HashMap<TypeId, String>,
}

impl StreamNameMapper {
    /// Start building a mapper.
    #[must_use]
    pub fn builder() -> StreamNameMapperBuilder {
        StreamNameMapperBuilder::default()
    }

    /// Category prefix for `T`.
    #[must_use]
    pub fn category_of<T: ?Sized + 'static>(&self) -> String {
        self.overrides
            .get(&TypeId::of::<T>())
            .cloned()
            .unwrap_or_else(|| default_category(std::any::type_name::<T>()))
    }

    /// Stream id for the entity `id` of type `T`, optionally scoped to a tenant.
    #[must_use]
    pub fn stream_id<T: ?Sized + 'static>(&self, id: &str, tenant: Option<&str>) -> StreamId {
        let category = self.category_of::<T>();
        match tenant {
            Some(tenant) => StreamId::new(format!(
                "{tenant}{TENANT_SEPARATOR}{category}{ID_SEPARATOR}{id}"
            )),
            None => StreamId::new(format!("{category}{ID_SEPARATOR}{id}")),
        }
    }

    /// Subscription id for a consumer of `T`, e.g. `shop_CartDetails-projection`.
    #[must_use]
    pub fn subscription_id<T: ?Sized + 'static>(&self, suffix: &str) -> String {
        format!("{}{ID_SEPARATOR}{suffix}", self.category_of::<T>())
    }
}

/// Builder for [`StreamNameMapper`].
#[derive(Debug, Default)]
pub struct StreamNameMapperBuilder {
    overrides: HashMap<TypeId, String>,
}

impl StreamNameMapperBuilder {
    /// Use `category` instead of the derived one for `T`.
    #[must_use]
    pub fn with_category<T: ?Sized + 'static>(mut self, category: impl Into<String>) -> Self {
        self.overrides.insert(TypeId::of::<T>(), category.into());
        self
    }

    /// Freeze the mapper.
    #[must_use]
    pub fn build(self) -> StreamNameMapper {
        StreamNameMapper {
            overrides: self.overrides,
        }
    }
}

/// `my_crate::carts::ShoppingCart<u8>` -> `my_crate_ShoppingCart`.
fn default_category(type_path: &str) -> String {
    let path = type_path.split('<').next().unwrap_or(type_path);
    let module = path.split("::").next().unwrap_or(path);
    let name = path.rsplit("::").next().unwrap_or(path);
    if module == name {
        name.to_string()
    } else {
        format!("{module}_{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod stream_id_tests {
        use super::*;

        #[test]
        #[allow(clippy::expect_used)]
        fn parse_from_str() {
            let id: StreamId = "cart-123".parse().expect("parse should succeed");
            assert_eq!(id, StreamId::new("cart-123"));
        }

        #[test]
        fn parse_empty_string_fails() {
            assert!("".parse::<StreamId>().is_err());
        }

        #[test]
        fn display_and_into_inner() {
            let id = StreamId::from("cart-123".to_string());
            assert_eq!(format!("{id}"), "cart-123");
            assert_eq!(id.into_inner(), "cart-123");
        }
    }

    mod version_tests {
        use super::*;

        #[test]
        fn initial_version() {
            assert_eq!(Version::INITIAL, Version::new(0));
            assert!(Version::INITIAL.is_initial());
            assert!(!Version::new(1).is_initial());
        }

        #[test]
        fn version_after_position() {
            assert_eq!(Version::after_position(0), Version::new(1));
            assert_eq!(Version::new(5) + 3, Version::new(8));
        }

        #[test]
        fn version_from_u64() {
            let version = Version::from(42_u64);
            let num: u64 = version.into();
            assert_eq!(num, 42);
        }
    }

    mod name_mapper_tests {
        use super::*;

        struct ShoppingCart;
        struct Wrapper<T>(T);

        #[test]
        fn default_category_uses_crate_and_type_name() {
            let mapper = StreamNameMapper::default();
            assert_eq!(mapper.category_of::<ShoppingCart>(), "catchup_core_ShoppingCart");
        }

        #[test]
        fn generics_are_stripped() {
            let mapper = StreamNameMapper::default();
            assert_eq!(
                mapper.category_of::<Wrapper<ShoppingCart>>(),
                "catchup_core_Wrapper"
            );
        }

        #[test]
        fn override_takes_precedence() {
            let mapper = StreamNameMapper::builder()
                .with_category::<ShoppingCart>("cart")
                .build();

            assert_eq!(mapper.stream_id::<ShoppingCart>("1", None).as_str(), "cart-1");
            assert_eq!(
                mapper.stream_id::<ShoppingCart>("1", Some("t1")).as_str(),
                "t1_cart-1"
            );
            assert_eq!(mapper.subscription_id::<ShoppingCart>("details"), "cart-details");
        }

        #[test]
        fn derivation_is_deterministic() {
            let a = StreamNameMapper::default();
            let b = StreamNameMapper::default();
            assert_eq!(
                a.stream_id::<ShoppingCart>("7", None),
                b.stream_id::<ShoppingCart>("7", None)
            );
        }

        #[test]
        fn primitive_paths_have_no_module_prefix() {
            assert_eq!(default_category("u64"), "u64");
        }
    }
}
