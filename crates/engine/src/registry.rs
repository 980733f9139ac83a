//! Static registration table of known saveable types.
//!
//! Built explicitly once at startup; there is no runtime type discovery.
//! Enumeration order is registration order and is deterministic.

use crate::slot::SlotPointer;
use keepsake_codec::CodecError;
use keepsake_common::Saveable;
use std::any::Any;
use std::sync::Arc;

/// A type-erased cached instance. The concrete type is recovered by
/// downcast through the registration that produced it.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

/// Monomorphized hooks for one saveable type.
///
/// Plain `fn` items, so the registry carries no state beyond the table and
/// is freely shared with the I/O worker.
pub struct Registration {
    pub key: &'static str,
    pub make_default: fn() -> CachedValue,
    pub decode: fn(&serde_json::Value) -> Result<CachedValue, CodecError>,
    pub encode: fn(&CachedValue) -> Result<serde_json::Value, CodecError>,
}

pub(crate) fn erased_default<T: Saveable>() -> CachedValue {
    Arc::new(T::default())
}

pub(crate) fn erased_decode<T: Saveable>(
    value: &serde_json::Value,
) -> Result<CachedValue, CodecError> {
    let parsed: T = serde_json::from_value(value.clone())
        .map_err(|e| CodecError::Serialization(e.to_string()))?;
    Ok(Arc::new(parsed))
}

pub(crate) fn erased_encode<T: Saveable>(
    value: &CachedValue,
) -> Result<serde_json::Value, CodecError> {
    let concrete = value.downcast_ref::<T>().ok_or_else(|| {
        CodecError::Serialization(format!("cached value for {} has the wrong type", T::KEY))
    })?;
    serde_json::to_value(concrete).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Fixed table of known saveable types.
pub struct Registry {
    entries: Vec<Registration>,
}

impl Registry {
    /// Create a registry with the engine's own [`SlotPointer`] pre-registered.
    pub fn new() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
        };
        registry.register::<SlotPointer>();
        registry
    }

    /// Add a saveable type. Duplicate keys are rejected so two types can
    /// never claim the same file name. Returns whether registration took.
    pub fn register<T: Saveable>(&mut self) -> bool {
        if self.lookup(T::KEY).is_some() {
            tracing::warn!(key = T::KEY, "duplicate saveable registration ignored");
            return false;
        }
        self.entries.push(Registration {
            key: T::KEY,
            make_default: erased_default::<T>,
            decode: erased_decode::<T>,
            encode: erased_encode::<T>,
        });
        true
    }

    pub fn lookup(&self, key: &str) -> Option<&Registration> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    /// Registrations in deterministic (registration) order.
    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
