//! Process-wide keyed storage for exchanging values between modules.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::GenerationGuard;

struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    // Values stored by module code pin the generation that created them.
    _guard: Option<GenerationGuard>,
}

/// Shared key/value store.
///
/// Reads are lenient: a missing key or a value of another type yields the
/// requested type's default instead of an error, since a consumer cannot
/// always know the producer's exact type.
#[derive(Default)]
pub struct SharedDataStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl SharedDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.insert(key.into(), Arc::new(value), None);
    }

    pub(crate) fn set_with_guard<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
        guard: Option<GenerationGuard>,
    ) {
        self.insert(key.into(), Arc::new(value), guard);
    }

    fn insert(
        &self,
        key: String,
        value: Arc<dyn Any + Send + Sync>,
        guard: Option<GenerationGuard>,
    ) {
        let previous = self.slots.write().insert(
            key,
            Slot {
                value,
                _guard: guard,
            },
        );
        // Released outside the lock; it may be the last reference to a generation.
        drop(previous);
    }

    /// Value for `key`, or `T::default()` when absent or of another type.
    pub fn get<T: Any + Clone + Default>(&self, key: &str) -> T {
        self.try_get(key).unwrap_or_default()
    }

    /// Value for `key` if present and of type `T`.
    pub fn try_get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        let slots = self.slots.read();
        slots
            .get(key)
            .and_then(|slot| slot.value.downcast_ref::<T>())
            .cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.slots.read().contains_key(key)
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.slots.write().remove(key);
        removed.is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.slots.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.slots.write());
        drop(drained);
    }
}

impl std::fmt::Debug for SharedDataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDataStore")
            .field("keys", &self.keys())
            .finish()
    }
}
