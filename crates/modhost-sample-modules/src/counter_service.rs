//! Counter Service
//!
//! A dependency module holding named counters, offered to extensions as the
//! [`Counter`] capability.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use modhost_sdk::prelude::*;
use parking_lot::RwLock;

pub const COUNTER_SERVICE_ID: &str = "samples.counter";

/// Named monotonic counters.
pub trait Counter: Send + Sync {
    /// Add one to `name` and return the new value.
    fn increment(&self, name: &str) -> u64;

    fn get(&self, name: &str) -> u64;

    fn reset(&self, name: &str);

    fn snapshot(&self) -> BTreeMap<String, u64>;
}

#[derive(Default)]
struct Counters {
    values: RwLock<BTreeMap<String, u64>>,
}

impl Counter for Counters {
    fn increment(&self, name: &str) -> u64 {
        let mut values = self.values.write();
        let value = values.entry(name.to_string()).or_insert(0);
        *value += 1;
        *value
    }

    fn get(&self, name: &str) -> u64 {
        self.values.read().get(name).copied().unwrap_or(0)
    }

    fn reset(&self, name: &str) {
        self.values.write().remove(name);
    }

    fn snapshot(&self) -> BTreeMap<String, u64> {
        self.values.read().clone()
    }
}

pub struct CounterService {
    counters: Arc<Counters>,
    initialized: AtomicBool,
}

impl CounterService {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            initialized: AtomicBool::new(false),
        }
    }
}

impl Default for CounterService {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyModule for CounterService {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(COUNTER_SERVICE_ID, "Counter Service", Version::new(1, 0, 0))
            .with_description("Named counters shared between modules")
    }

    fn initialize(&self) -> ModuleResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(ModuleError::InitializationFailed(
                "counter service already initialized".into(),
            ));
        }
        Ok(())
    }

    fn dispose(&self) -> ModuleResult<()> {
        self.counters.values.write().clear();
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn provide_capabilities(&self, capabilities: &mut CapabilitySet) {
        capabilities.provide::<dyn Counter>(self.counters.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters = Counters::default();
        assert_eq!(counters.increment("clicks"), 1);
        assert_eq!(counters.increment("clicks"), 2);
        assert_eq!(counters.get("ticks"), 0);

        counters.reset("clicks");
        assert_eq!(counters.get("clicks"), 0);
        assert!(counters.snapshot().is_empty());
    }

    #[test]
    fn test_capability_is_offered() {
        let service = CounterService::new();
        service.initialize().unwrap();
        assert!(service.initialize().is_err());

        let mut capabilities = CapabilitySet::new();
        service.provide_capabilities(&mut capabilities);
        let counter = capabilities.get::<dyn Counter>().unwrap();
        counter.increment("a");

        service.dispose().unwrap();
        assert_eq!(counter.get("a"), 0);
    }
}
