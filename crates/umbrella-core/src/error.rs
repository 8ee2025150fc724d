//! Error types for the reconciliation engine
//!
//! The four reconciliation failures (configuration, remote not-found, remote
//! request, unsupported operation) always carry the resource they concern.

use crate::schema::ResourceKind;
use std::fmt;
use thiserror::Error;

/// Result type alias for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the resource instance an error refers to
///
/// `id` is `None` before the remote API has assigned an identifier
/// (i.e. during Create).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: Option<i64>,
}

impl ResourceRef {
    /// Reference to an instance that does not have an identifier yet
    pub fn new_instance(kind: ResourceKind) -> Self {
        Self { kind, id: None }
    }

    /// Reference to an existing instance
    pub fn existing(kind: ResourceKind, id: i64) -> Self {
        Self { kind, id: Some(id) }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} {}", self.kind, id),
            None => write!(f, "{} (new)", self.kind),
        }
    }
}

/// Core error type for the reconciliation engine
#[derive(Error, Debug)]
pub enum Error {
    /// Desired tree violates the resource descriptor
    #[error("Configuration error for {resource}: {message}")]
    Configuration {
        resource: ResourceRef,
        message: String,
    },

    /// The remote API no longer knows the identifier
    #[error("Remote object not found: {resource}")]
    RemoteNotFound { resource: ResourceRef },

    /// Transport, authentication or validation failure reported by the remote API client
    #[error("Remote request failed for {resource}: {message}")]
    RemoteRequest {
        resource: ResourceRef,
        message: String,
    },

    /// Operation not offered by the resource kind
    #[error("Operation '{operation}' is not supported for {kind}: {hint}")]
    UnsupportedOperation {
        kind: ResourceKind,
        operation: &'static str,
        hint: &'static str,
    },

    /// An attribute could not be projected into the requested type
    #[error("Attribute error: {0}")]
    Attribute(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Provider configuration errors
    #[error("Provider configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error for a resource
    pub fn configuration(resource: ResourceRef, message: impl Into<String>) -> Self {
        Self::Configuration {
            resource,
            message: message.into(),
        }
    }

    /// Create a "remote not found" error
    pub fn remote_not_found(resource: ResourceRef) -> Self {
        Self::RemoteNotFound { resource }
    }

    /// Create a remote request error
    pub fn remote_request(resource: ResourceRef, message: impl Into<String>) -> Self {
        Self::RemoteRequest {
            resource,
            message: message.into(),
        }
    }

    /// Create an attribute projection error
    pub fn attribute(msg: impl Into<String>) -> Self {
        Self::Attribute(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a provider configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The resource this error concerns, if any
    pub fn resource(&self) -> Option<ResourceRef> {
        match self {
            Self::Configuration { resource, .. }
            | Self::RemoteNotFound { resource }
            | Self::RemoteRequest { resource, .. } => Some(*resource),
            Self::UnsupportedOperation { kind, .. } => Some(ResourceRef::new_instance(*kind)),
            _ => None,
        }
    }

    /// Whether this is a remote "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteNotFound { .. })
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
