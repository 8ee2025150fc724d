// # umbrella-core
//
// Resource reconciliation engine for the Umbrella infrastructure provider.
//
// ## Architecture Overview
//
// This library reconciles user-declared configuration for Umbrella sites,
// virtual appliances and tunnels with the live state of the management API,
// and reads the datacenter list data source:
// - **AttrValue / Object**: Three-valued (known / null / unknown) attribute trees
// - **ResourceSchema**: Static per-kind descriptors (shape, wire names, policies)
// - **mapper**: Tree ⇄ payload conversion, unknown resolution, state encoding
// - **Reconciler**: Create/Read/Update/Delete/Import state machine
// - **RemoteApi**: Trait for the remote API client (transport lives elsewhere)
// - **StateStore**: Trait for persisting the last reconciled tree per instance
//
// ## Design Principles
//
// 1. **No silent loss**: values the remote never echoes are carried from prior state
// 2. **Fail fast**: configuration errors are raised before any remote call
// 3. **Write-then-confirm**: updates are always followed by a fresh read
// 4. **Library-first**: the binary is a thin shell over this crate

pub mod config;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod schema;
pub mod state;
pub mod traits;
pub mod value;

// Re-export core types for convenience
pub use config::{ApiSettings, ProviderConfig, ReconcilerConfig, StateStoreConfig};
pub use engine::{Instance, InstanceState, Operation, ReconcileEvent, Reconciler};
pub use error::{Error, ResourceRef, Result};
pub use schema::{Payload, ResourceKind, ResourceSchema};
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{ApiError, RecordKey, RemoteApi, StateRecord, StateStore};
pub use value::{AttrValue, Known, Object};
