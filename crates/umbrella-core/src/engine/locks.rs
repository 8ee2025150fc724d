//! Per-instance operation locks
//!
//! At most one reconciliation runs against a given (kind, identifier) at a
//! time. Operations on different instances proceed concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::traits::RecordKey;

/// Keyed table of async mutexes
#[derive(Debug, Default)]
pub(crate) struct InstanceLocks {
    table: Mutex<HashMap<RecordKey, Arc<Mutex<()>>>>,
}

impl InstanceLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to an instance
    ///
    /// The guard releases the instance when dropped, including when the
    /// operation future holding it is cancelled.
    pub(crate) async fn acquire(&self, key: RecordKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().await;
            // Entries only referenced by the table are idle
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            table.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.table.lock().await.len()
    }
}
