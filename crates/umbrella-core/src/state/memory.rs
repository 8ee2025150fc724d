// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Purpose
//
// Provides a fast state store that doesn't persist across restarts.
// Useful for tests and for one-shot invocations where the host keeps the
// authoritative state itself.
//
// ## Crash Behavior
//
// - All records are lost on restart/crash
// - Write-only and never-echoed values (tunnel secrets) cannot be recovered
//   afterwards; the next Read resolves them to Null

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::{RecordKey, StateRecord, StateStore};

/// In-memory state store implementation
///
/// Records live in a HashMap protected by a RwLock. Cloning the store shares
/// the underlying map.
///
/// # Example
///
/// ```rust,ignore
/// use umbrella_core::state::MemoryStateStore;
/// use umbrella_core::{RecordKey, ResourceKind, StateStore};
///
/// let store = MemoryStateStore::new();
/// let key = RecordKey::new(ResourceKind::Site, 1);
/// assert!(store.get_record(&key).await?.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<RecordKey, StateRecord>>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the number of records in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Clear all records from the store
    pub async fn clear(&self) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.clear();
        Ok(())
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_record(&self, key: &RecordKey) -> Result<Option<StateRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(key).cloned())
    }

    async fn set_record(&self, record: &StateRecord) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(record.key(), record.clone());
        Ok(())
    }

    async fn delete_record(&self, key: &RecordKey) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(key);
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<RecordKey>, Error> {
        let guard = self.inner.read().await;
        let mut keys: Vec<RecordKey> = guard.keys().copied().collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush(&self) -> Result<(), Error> {
        // No-op for memory store (everything is already "persisted")
        Ok(())
    }
}
