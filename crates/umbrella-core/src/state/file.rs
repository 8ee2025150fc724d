// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Purpose
//
// Keeps reconciliation records across invocations. This matters most for
// attributes the remote API never echoes (tunnel secrets, id prefixes):
// losing the file means losing those values.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Corruption detection: JSON validation on load
// - Automatic backup: keeps `.backup` of the previous state
// - Recovery: falls back to the backup if the main file is corrupted
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": {
//     "tunnel/42": {
//       "kind": "tunnel",
//       "id": 42,
//       "attributes": { "name": "branch-1", "...": null },
//       "last_reconciled": "2025-01-09T12:00:00Z"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::state_store::{RecordKey, StateRecord, StateStore};

/// State file format version
const STATE_FILE_VERSION: &str = "1.0";

/// File-based state store with crash recovery
///
/// Every mutation is written through immediately. The in-memory view only
/// changes once the new file is in place, so a failed write leaves both the
/// cache and the disk at the previous state.
///
/// # Example
///
/// ```rust,ignore
/// use umbrella_core::state::FileStateStore;
///
/// let store = FileStateStore::new("/var/lib/umbrella/state.json").await?;
/// for key in store.list_records().await? {
///     println!("{}", key);
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    records: Arc<RwLock<HashMap<RecordKey, StateRecord>>>,
}

/// Serializable state file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    records: BTreeMap<String, StateRecord>,
}

impl FileStateStore {
    /// Create or load a file state store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing state file
    /// 3. If it is corrupted, load the backup instead
    /// 4. If both are unusable, start with empty state
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let records = Self::load_state_with_recovery(&path).await?;

        Ok(Self {
            path,
            records: Arc::new(RwLock::new(records)),
        })
    }

    /// Path of the main state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_state_with_recovery(
        path: &Path,
    ) -> Result<HashMap<RecordKey, StateRecord>, Error> {
        let Some(content) = Self::read_state(path).await? else {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(HashMap::new());
        };

        let err = match Self::parse_state(&content) {
            Ok(records) => {
                tracing::debug!("Loaded state from file: {} records", records.len());
                return Ok(records);
            }
            Err(e) => e,
        };

        tracing::warn!(
            "State file {} appears corrupted: {}. Attempting recovery from backup.",
            path.display(),
            err
        );

        let backup_path = Self::backup_path(path);
        let Some(backup) = Self::read_state(&backup_path).await? else {
            tracing::warn!("No backup file found. Starting with empty state.");
            return Ok(HashMap::new());
        };

        match Self::parse_state(&backup) {
            Ok(records) => {
                tracing::info!("Recovered state from backup: {} records", records.len());
                if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await {
                    tracing::error!("Failed to restore state file from backup: {}", restore_err);
                }
                Ok(records)
            }
            Err(backup_err) => {
                tracing::error!(
                    "Backup also corrupted: {}. Starting with empty state.",
                    backup_err
                );
                Ok(HashMap::new())
            }
        }
    }

    async fn read_state(path: &Path) -> Result<Option<String>, Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(content))
    }

    fn parse_state(content: &str) -> Result<HashMap<RecordKey, StateRecord>, serde_json::Error> {
        let state_file: StateFileFormat = serde_json::from_str(content)?;

        if state_file.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STATE_FILE_VERSION,
                state_file.version
            );
        }

        // Keys are derived from the records themselves; the map key is informational
        Ok(state_file
            .records
            .into_values()
            .map(|record| (record.key(), record))
            .collect())
    }

    /// Write a snapshot of the records to file atomically
    ///
    /// Callers hold the write lock so snapshots reach the disk in order.
    async fn write_state(&self, records: &HashMap<RecordKey, StateRecord>) -> Result<(), Error> {
        let state_file = StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            records: records
                .values()
                .map(|record| (record.key().to_string(), record.clone()))
                .collect(),
        };

        let json = serde_json::to_string_pretty(&state_file)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }

    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored state file from backup");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_record(&self, key: &RecordKey) -> Result<Option<StateRecord>, Error> {
        let records = self.records.read().await;
        Ok(records.get(key).cloned())
    }

    async fn set_record(&self, record: &StateRecord) -> Result<(), Error> {
        let mut records = self.records.write().await;

        let mut next = records.clone();
        next.insert(record.key(), record.clone());

        // Immediate write for durability; commit to memory only once on disk
        self.write_state(&next).await?;
        *records = next;
        Ok(())
    }

    async fn delete_record(&self, key: &RecordKey) -> Result<(), Error> {
        let mut records = self.records.write().await;
        if !records.contains_key(key) {
            return Ok(());
        }

        let mut next = records.clone();
        next.remove(key);

        self.write_state(&next).await?;
        *records = next;
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<RecordKey>, Error> {
        let records = self.records.read().await;
        let mut keys: Vec<RecordKey> = records.keys().copied().collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush(&self) -> Result<(), Error> {
        // Mutations are already on disk; rewrite the snapshot so the file exists
        let records = self.records.write().await;
        self.write_state(&records).await
    }
}
