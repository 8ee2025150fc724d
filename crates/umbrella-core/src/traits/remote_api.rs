// # Remote API Trait
//
// Defines the interface to the Umbrella management API.
//
// The HTTP transport, authentication and token refresh live behind this
// trait; the reconciler only sees JSON payloads keyed by wire names and
// 64-bit identifiers.
//
// ## Usage
//
// ```rust,ignore
// use umbrella_core::{RemoteApi, ResourceKind};
//
// let payload = api.get(ResourceKind::Site, 42).await?;
// println!("site name: {}", payload["name"]);
// ```

use async_trait::async_trait;
use thiserror::Error;

use crate::schema::{Payload, ResourceKind};

/// Failure reported by a remote API client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The identifier is unknown to the remote
    #[error("not found")]
    NotFound,

    /// Transport, authentication or validation failure
    #[error("{0}")]
    Request(String),
}

impl ApiError {
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }
}

/// Trait for remote API clients
///
/// # Trust Level: Untrusted
///
/// Clients perform exactly one remote call per method invocation. They do
/// not retry, do not touch the state store, and do not decide whether a call
/// is needed; all of that is owned by the [`crate::Reconciler`].
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create an object; the response carries the assigned identifier
    async fn create(&self, kind: ResourceKind, payload: &Payload) -> Result<Payload, ApiError>;

    /// Fetch an object by identifier
    async fn get(&self, kind: ResourceKind, id: i64) -> Result<Payload, ApiError>;

    /// Replace the writable attributes of an object
    ///
    /// The response body is not trusted; the reconciler re-reads afterwards.
    async fn update(
        &self,
        kind: ResourceKind,
        id: i64,
        payload: &Payload,
    ) -> Result<Payload, ApiError>;

    /// Delete an object
    async fn delete(&self, kind: ResourceKind, id: i64) -> Result<(), ApiError>;

    /// List every object of a kind
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Payload>, ApiError>;

    /// Fetch the datacenter list
    ///
    /// The payload holds a `continents` array, each continent carrying its
    /// `cities` with their location, address range and fqdn.
    async fn list_datacenters(&self) -> Result<Payload, ApiError>;

    /// Client name (for logging/debugging)
    fn client_name(&self) -> &'static str;
}
