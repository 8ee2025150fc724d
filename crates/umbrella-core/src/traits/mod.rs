//! Collaborator traits for the reconciliation engine
//!
//! - [`RemoteApi`]: Create/read/update/delete/list objects on the remote API
//! - [`StateStore`]: Persist the last reconciled tree per resource instance

pub mod remote_api;
pub mod state_store;

pub use remote_api::{ApiError, RemoteApi};
pub use state_store::{RecordKey, StateRecord, StateStore};
