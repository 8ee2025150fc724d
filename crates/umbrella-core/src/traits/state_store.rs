// # State Store Trait
//
// Defines the interface for persisting reconciliation records.
//
// ## Purpose
//
// The state store holds, per resource instance, the last successfully
// reconciled attribute tree. It is the source of:
// - Prior values for `UseLastKnown` attributes (secrets, write-only fields)
// - Unknown resolution during Update
// - The record set that `Read` can drop when the remote object vanished
//
// ## Implementations
//
// - Memory: `MemoryStateStore`
// - File: `FileStateStore` (JSON, atomic write + backup)
//
// ## Usage
//
// ```rust,ignore
// use umbrella_core::{RecordKey, ResourceKind, StateStore};
//
// let key = RecordKey::new(ResourceKind::Tunnel, 42);
// if let Some(record) = store.get_record(&key).await? {
//     println!("last reconciled at {}", record.last_reconciled);
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;
use crate::schema::ResourceKind;

/// Key of a reconciliation record: resource kind plus remote identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub kind: ResourceKind,
    pub id: i64,
}

impl RecordKey {
    pub fn new(kind: ResourceKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

impl FromStr for RecordKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (kind, id) = s
            .split_once('/')
            .ok_or_else(|| Error::state_store(format!("Malformed record key: {}", s)))?;
        let id = id
            .parse()
            .map_err(|_| Error::state_store(format!("Malformed record identifier in key: {}", s)))?;
        Ok(Self::new(kind.parse()?, id))
    }
}

/// Persisted reconciliation record
///
/// `attributes` is the tree encoded by attribute name (see
/// [`crate::mapper::encode_state`]); it never contains Unknown values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub kind: ResourceKind,
    pub id: i64,
    pub attributes: serde_json::Value,
    /// Timestamp of the last successful reconciliation
    pub last_reconciled: chrono::DateTime<chrono::Utc>,
}

impl StateRecord {
    /// Create a record stamped with the current time
    ///
    /// `pub(crate)`: records are only produced by the reconciler after a
    /// successful remote operation.
    pub(crate) fn new(key: RecordKey, attributes: serde_json::Value) -> Self {
        Self {
            kind: key.kind,
            id: key.id,
            attributes,
            last_reconciled: chrono::Utc::now(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.kind, self.id)
    }

    /// Check if the record is stale (older than given duration)
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        let now = chrono::Utc::now();
        now.signed_duration_since(self.last_reconciled) > max_age
    }
}

/// Trait for state store implementations
///
/// Implementations must be thread-safe and usable across async tasks. The
/// reconciler is the only writer; it issues exactly one write per
/// successful operation, so a dropped operation leaves the store untouched.
///
/// ## Implementation Guidelines
///
/// - **Async I/O only**: never block the runtime
/// - **Explicit flush**: `flush()` must persist all pending changes
/// - **No business logic**: merge and unknown resolution belong to the reconciler
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a record
    ///
    /// # Returns
    ///
    /// - `Ok(Some(StateRecord))`: The stored record
    /// - `Ok(None)`: No record found
    /// - `Err(Error)`: Storage error
    async fn get_record(&self, key: &RecordKey) -> Result<Option<StateRecord>, Error>;

    /// Create or replace a record
    async fn set_record(&self, record: &StateRecord) -> Result<(), Error>;

    /// Delete a record
    ///
    /// Deleting a missing record is not an error.
    async fn delete_record(&self, key: &RecordKey) -> Result<(), Error>;

    /// List all record keys in the store
    async fn list_records(&self) -> Result<Vec<RecordKey>, Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), Error>;
}
