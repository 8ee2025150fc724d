// # State Store Implementations
//
// This module provides implementations of the StateStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use std::sync::Arc;

use crate::Error;
use crate::config::StateStoreConfig;
use crate::traits::StateStore;

/// Open the state store described by the configuration
pub async fn open(config: &StateStoreConfig) -> Result<Arc<dyn StateStore>, Error> {
    config.validate()?;
    let store: Arc<dyn StateStore> = match config {
        StateStoreConfig::File { path } => {
            tracing::debug!("Opening file state store at {}", path);
            Arc::new(FileStateStore::new(path).await?)
        }
        StateStoreConfig::Memory => {
            tracing::debug!("Using in-memory state store");
            Arc::new(MemoryStateStore::new())
        }
    };
    Ok(store)
}
