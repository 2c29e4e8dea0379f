use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use batchstock_core::{BatchId, ItemId, LocationId};

/// Serialization scope for validate-then-append.
///
/// Concurrent writers on the same scope must not interleave between the
/// balance read and the append (two individually-safe decrements can jointly
/// go negative). Disjoint scopes proceed in parallel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeKey {
    ItemLocation(ItemId, LocationId),
    Batch(BatchId),
}

/// Lazily-created per-scope mutexes.
///
/// Callers hold the returned handle and lock it for the duration of
/// validate+append. When multiple scopes are involved, acquire in `ScopeKey`
/// order (item scope sorts before batch scope) so two writers can never hold
/// them in opposite order.
#[derive(Debug, Default)]
pub struct ScopeLockMap {
    inner: Mutex<HashMap<ScopeKey, Arc<Mutex<()>>>>,
}

impl ScopeLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for the scope's mutex, creating it on first use.
    pub fn handle(&self, key: ScopeKey) -> Arc<Mutex<()>> {
        // A poisoned registry map still holds structurally valid handles.
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key).or_default())
    }
}
