//! The process-wide `InstanceId -> lock` map: the only static mutable state
//! in this crate (§3/§7). Guarantees that two [`crate::RuntimeManager`]s
//! constructed for the same `InstanceId`, even from unrelated callers in the
//! same host process, serialize their lifecycle operations against each
//! other rather than racing two tor processes over the same data directory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// An opaque string identifying a runtime instance within the host process,
/// typically derived from the instance's data directory.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct InstanceId(Arc<str>);

impl InstanceId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn registry() -> &'static Mutex<HashMap<InstanceId, Arc<tokio::sync::Mutex<()>>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<InstanceId, Arc<tokio::sync::Mutex<()>>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the shared lock for `id`, creating it if this is the first
/// `RuntimeManager` constructed for that id in this process.
pub fn lock_for(id: &InstanceId) -> Arc<tokio::sync::Mutex<()>> {
    let mut map = registry().lock().unwrap();
    map.entry(id.clone()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
}

/// Drops the registry's entry for `id`. Called by `destroy()`; safe to call
/// even if another instance still holds a clone of the `Arc` (the map entry
/// is just the map's own handle, not the only reference).
pub fn release(id: &InstanceId) {
    registry().lock().unwrap().remove(id);
}
