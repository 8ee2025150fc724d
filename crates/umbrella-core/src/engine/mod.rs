//! Resource reconciler
//!
//! The Reconciler is responsible for:
//! - Validating desired trees against the resource descriptor
//! - Translating trees to payloads and calling the RemoteApi
//! - Merging responses with the last reconciled state
//! - Persisting reconciliation records after successful operations
//!
//! ## Architecture
//!
//! ```text
//!   desired tree ──┐
//!                  ▼
//!          ┌──────────────┐   payload   ┌─────────────┐
//!          │  Reconciler  │────────────▶│  RemoteApi  │
//!          └──────────────┘◀────────────└─────────────┘
//!             │        ▲      response
//!     record  │        │ prior tree
//!             ▼        │
//!          ┌──────────────┐           ┌─────────────┐
//!          │  StateStore  │           │   Events    │
//!          └──────────────┘           └─────────────┘
//! ```
//!
//! ## Instance lifecycle
//!
//! ```text
//! Absent ─create─▶ Creating ─▶ Present ─update─▶ Updating ─▶ Present
//!                                 │ read: not found ─▶ Gone
//!                                 └─delete─▶ Deleting ─▶ Gone ─import─▶ Creating
//! ```
//!
//! A failed operation aborts the transition: nothing is persisted and a
//! second transition returns the instance to where it was. The exception is
//! an object that vanished mid-operation, which goes to Gone instead. There
//! is no automatic retry.

mod locks;

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ReconcilerConfig;
use crate::error::{Error, ResourceRef, Result};
use crate::mapper;
use crate::schema::{Payload, ResourceKind, ResourceSchema};
use crate::traits::{ApiError, RecordKey, RemoteApi, StateRecord, StateStore};
use crate::value::{AttrValue, Object};
use locks::InstanceLocks;

/// Lifecycle state of a resource instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Absent,
    Creating,
    Present,
    Updating,
    Deleting,
    Gone,
}

/// Host-facing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
    List,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Import => "import",
            Operation::List => "list",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// An instance moved between lifecycle states
    Transition {
        resource: ResourceRef,
        from: InstanceState,
        to: InstanceState,
    },

    /// A Read confirmed the instance and refreshed its record
    Refreshed { resource: ResourceRef },

    /// An operation failed; the instance state is unchanged
    Failed {
        resource: ResourceRef,
        operation: Operation,
        error: String,
    },
}

/// A reconciled resource instance
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub kind: ResourceKind,
    pub id: i64,
    pub attributes: Object,
}

/// Resource reconciler
///
/// Executes Create/Read/Update/Delete/Import for every resource kind against
/// a [`RemoteApi`], keeping a [`StateStore`] record per instance.
///
/// ## Threading
///
/// The reconciler is `Send + Sync` and may be shared behind an `Arc`.
/// Operations on the same (kind, identifier) are serialized; operations on
/// different instances run concurrently.
pub struct Reconciler {
    /// Remote API client
    api: Arc<dyn RemoteApi>,

    /// Last reconciled trees
    state_store: Arc<dyn StateStore>,

    /// Per-instance serialization
    locks: InstanceLocks,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver) where event_receiver yields reconcile events
    pub fn new(
        api: Arc<dyn RemoteApi>,
        state_store: Arc<dyn StateStore>,
        config: &ReconcilerConfig,
    ) -> Result<(Self, mpsc::Receiver<ReconcileEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let reconciler = Self {
            api,
            state_store,
            locks: InstanceLocks::new(),
            event_tx: tx,
        };

        Ok((reconciler, rx))
    }

    /// Create a new remote object from a desired tree
    ///
    /// Fails fast with a configuration error before any remote call when the
    /// tree does not fit the descriptor or a required attribute is Null or
    /// Unknown.
    pub async fn create(&self, kind: ResourceKind, desired: &Object) -> Result<Instance> {
        let resource = ResourceRef::new_instance(kind);
        let result = self.create_inner(kind, desired).await;
        self.observe(resource, Operation::Create, result)
    }

    /// Refresh an instance from the remote API
    ///
    /// If the remote no longer knows the identifier, the record is dropped and
    /// `RemoteNotFound` is returned. An instance without a record is returned
    /// as read but not persisted; adopting it is what [`Reconciler::import`]
    /// is for.
    pub async fn read(&self, kind: ResourceKind, id: i64) -> Result<Instance> {
        let resource = ResourceRef::existing(kind, id);
        let result = self.read_inner(kind, id).await;
        self.observe(resource, Operation::Read, result)
    }

    /// Push a desired tree to an existing instance, then re-read it
    ///
    /// Unknown desired values are replaced by the pre-update persisted values
    /// before anything is sent.
    pub async fn update(&self, kind: ResourceKind, id: i64, desired: &Object) -> Result<Instance> {
        let resource = ResourceRef::existing(kind, id);
        let result = self.update_inner(kind, id, desired).await;
        self.observe(resource, Operation::Update, result)
    }

    /// Delete an instance
    ///
    /// A remote "not found" counts as success.
    pub async fn delete(&self, kind: ResourceKind, id: i64) -> Result<()> {
        let resource = ResourceRef::existing(kind, id);
        let result = self.delete_inner(kind, id).await;
        self.observe(resource, Operation::Delete, result)
    }

    /// Adopt an existing remote object by its identifier
    pub async fn import(&self, kind: ResourceKind, external_id: &str) -> Result<Instance> {
        let result = match require_addressable(kind.schema(), Operation::Import)
            .and_then(|()| parse_identifier(kind, external_id))
        {
            Ok(id) => self.import_inner(kind, id).await,
            Err(e) => Err(e),
        };
        let resource = match result.as_ref() {
            Ok(instance) => ResourceRef::existing(kind, instance.id),
            Err(e) => e.resource().unwrap_or(ResourceRef::new_instance(kind)),
        };
        self.observe(resource, Operation::Import, result)
    }

    /// Read every instance of a kind (data source); nothing is persisted
    pub async fn list(&self, kind: ResourceKind) -> Result<Vec<Instance>> {
        let resource = ResourceRef::new_instance(kind);
        let result = self.list_inner(kind).await;
        self.observe(resource, Operation::List, result)
    }

    /// Read the datacenter list data source; nothing is persisted
    pub async fn datacenters(&self) -> Result<Object> {
        let resource = ResourceRef::new_instance(ResourceKind::Datacenters);
        let result = self.datacenters_inner(resource).await;
        self.observe(resource, Operation::List, result)
    }

    async fn create_inner(&self, kind: ResourceKind, desired: &Object) -> Result<Instance> {
        let schema = kind.schema();
        let resource = ResourceRef::new_instance(kind);

        if !schema.supports_create {
            return Err(unsupported(schema, Operation::Create));
        }

        schema.validate_desired(resource, desired, false)?;

        self.transition(resource, InstanceState::Absent, InstanceState::Creating);

        match self.create_remote(schema, desired).await {
            Ok(instance) => {
                let resource = ResourceRef::existing(kind, instance.id);
                info!("Created {}", resource);
                self.transition(resource, InstanceState::Creating, InstanceState::Present);
                Ok(instance)
            }
            Err(e) => {
                let resource = e.resource().unwrap_or(resource);
                self.transition(resource, InstanceState::Creating, InstanceState::Absent);
                Err(e)
            }
        }
    }

    /// Remote half of Create: send, map the response and persist it
    async fn create_remote(&self, schema: &ResourceSchema, desired: &Object) -> Result<Instance> {
        let kind = schema.kind;
        let resource = ResourceRef::new_instance(kind);

        let payload = mapper::to_payload(desired, &schema.root);
        debug!(
            "Creating {} via {} with fields {:?}",
            kind,
            self.api.client_name(),
            payload.keys().collect::<Vec<_>>()
        );

        let mut response = self
            .api
            .create(kind, &payload)
            .await
            .map_err(|e| remote_error(resource, e))?;

        let id = response
            .get(schema.id_wire)
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::remote_request(
                    resource,
                    format!("create response carries no '{}' identifier", schema.id_wire),
                )
            })?;
        let resource = ResourceRef::existing(kind, id);

        if let Some(fixup) = schema.create_fixup {
            fixup(&mut response, id);
        }

        let mut tree = self.map_response(resource, schema, &response, None)?;
        mapper::retain_write_only(&mut tree, desired, &schema.root);
        stamp(&mut tree, schema);

        self.persist(RecordKey::new(kind, id), &tree).await?;

        Ok(Instance {
            kind,
            id,
            attributes: tree,
        })
    }

    async fn read_inner(&self, kind: ResourceKind, id: i64) -> Result<Instance> {
        let schema = kind.schema();
        require_addressable(schema, Operation::Read)?;
        let key = RecordKey::new(kind, id);
        let resource = ResourceRef::existing(kind, id);
        let _guard = self.locks.acquire(key).await;

        let prior = self.load(key, schema).await?;
        let tracked = prior.as_ref().map(|_| InstanceState::Present);
        let tree = self
            .fetch(key, schema, prior.as_ref(), tracked)
            .await?
            .ok_or_else(|| Error::remote_not_found(resource))?;

        if prior.is_some() {
            self.persist(key, &tree).await?;
            debug!("Refreshed {}", resource);
            self.emit_event(ReconcileEvent::Refreshed { resource });
        } else {
            debug!("{} has no reconciliation record, returning it unpersisted", resource);
        }

        Ok(Instance {
            kind,
            id,
            attributes: tree,
        })
    }

    async fn update_inner(&self, kind: ResourceKind, id: i64, desired: &Object) -> Result<Instance> {
        let schema = kind.schema();
        require_addressable(schema, Operation::Update)?;
        let key = RecordKey::new(kind, id);
        let resource = ResourceRef::existing(kind, id);
        let _guard = self.locks.acquire(key).await;

        schema.validate_desired(resource, desired, true)?;

        let prior = match self.load(key, schema).await? {
            Some(tree) => tree,
            None => {
                warn!("No reconciliation record for {}, updating without prior state", resource);
                Object::new()
            }
        };

        let merged = mapper::resolve_unknowns(desired, &prior, &schema.root);
        if let Some(problem) = schema.root.missing_required(&merged, false) {
            return Err(Error::configuration(resource, problem));
        }

        self.transition(resource, InstanceState::Present, InstanceState::Updating);

        debug!(
            "Updating {}: changed fields {:?}",
            resource,
            prior.diff_fields(&merged)
        );

        let payload = mapper::to_payload(&merged, &schema.root);
        let outcome = match self.api.update(kind, id, &payload).await {
            // Write-then-confirm: the update response is not trusted
            Ok(_) => {
                self.confirm(key, schema, Some(&merged), InstanceState::Updating)
                    .await
            }
            Err(e) => Err(remote_error(resource, e)),
        };

        let tree = self.settle(
            resource,
            InstanceState::Updating,
            InstanceState::Present,
            InstanceState::Present,
            outcome,
        )?;
        info!("Updated {}", resource);

        Ok(Instance {
            kind,
            id,
            attributes: tree,
        })
    }

    async fn delete_inner(&self, kind: ResourceKind, id: i64) -> Result<()> {
        require_addressable(kind.schema(), Operation::Delete)?;
        let key = RecordKey::new(kind, id);
        let resource = ResourceRef::existing(kind, id);
        let _guard = self.locks.acquire(key).await;

        self.transition(resource, InstanceState::Present, InstanceState::Deleting);

        if let Err(e) = self.delete_remote(key).await {
            self.transition(resource, InstanceState::Deleting, InstanceState::Present);
            return Err(e);
        }

        info!("Deleted {}", resource);
        self.transition(resource, InstanceState::Deleting, InstanceState::Gone);
        Ok(())
    }

    async fn delete_remote(&self, key: RecordKey) -> Result<()> {
        let resource = ResourceRef::existing(key.kind, key.id);

        match self.api.delete(key.kind, key.id).await {
            Ok(()) => {}
            Err(ApiError::NotFound) => {
                debug!("{} already absent on the remote", resource);
            }
            Err(e) => return Err(remote_error(resource, e)),
        }

        self.state_store.delete_record(&key).await
    }

    async fn import_inner(&self, kind: ResourceKind, id: i64) -> Result<Instance> {
        let schema = kind.schema();
        let key = RecordKey::new(kind, id);
        let resource = ResourceRef::existing(kind, id);
        let _guard = self.locks.acquire(key).await;

        self.transition(resource, InstanceState::Gone, InstanceState::Creating);

        let outcome = self
            .confirm(key, schema, None, InstanceState::Creating)
            .await;
        let tree = self.settle(
            resource,
            InstanceState::Creating,
            InstanceState::Present,
            InstanceState::Gone,
            outcome,
        )?;
        info!("Imported {}", resource);

        Ok(Instance {
            kind,
            id,
            attributes: tree,
        })
    }

    async fn list_inner(&self, kind: ResourceKind) -> Result<Vec<Instance>> {
        let schema = kind.schema();
        require_addressable(schema, Operation::List)?;
        let resource = ResourceRef::new_instance(kind);

        let payloads = self
            .api
            .list(kind)
            .await
            .map_err(|e| remote_error(resource, e))?;

        let mut instances = Vec::with_capacity(payloads.len());
        for payload in payloads {
            if let Some(keep) = schema.list_filter
                && !keep(&payload)
            {
                continue;
            }

            let Some(id) = payload.get(schema.id_wire).and_then(Value::as_i64) else {
                warn!("Skipping listed {} without '{}' identifier", kind, schema.id_wire);
                continue;
            };

            let resource = ResourceRef::existing(kind, id);
            let tree = self.map_response(resource, schema, &payload, None)?;
            instances.push(Instance {
                kind,
                id,
                attributes: tree,
            });
        }

        debug!("Listed {} {} instances", instances.len(), kind);
        Ok(instances)
    }

    async fn datacenters_inner(&self, resource: ResourceRef) -> Result<Object> {
        let schema = ResourceKind::Datacenters.schema();

        let payload = self
            .api
            .list_datacenters()
            .await
            .map_err(|e| remote_error(resource, e))?;
        let tree = self.map_response(resource, schema, &payload, None)?;

        debug!(
            "Read datacenter list via {}: {} continents",
            self.api.client_name(),
            tree.value("continents").as_list().map_or(0, |c| c.len())
        );
        Ok(tree)
    }

    /// Get an object and map it against `prior`
    ///
    /// `Ok(None)` means the remote no longer knows the identifier. The record
    /// is dropped and, when the instance was tracked in state `from`, it
    /// moves to Gone.
    async fn fetch(
        &self,
        key: RecordKey,
        schema: &ResourceSchema,
        prior: Option<&Object>,
        from: Option<InstanceState>,
    ) -> Result<Option<Object>> {
        let resource = ResourceRef::existing(key.kind, key.id);

        match self.api.get(key.kind, key.id).await {
            Ok(payload) => self.map_response(resource, schema, &payload, prior).map(Some),
            Err(ApiError::NotFound) => {
                warn!("{} no longer exists on the remote, dropping its record", resource);
                self.state_store.delete_record(&key).await?;
                if let Some(from) = from {
                    self.transition(resource, from, InstanceState::Gone);
                }
                Ok(None)
            }
            Err(e) => Err(remote_error(resource, e)),
        }
    }

    /// Re-read an instance after a write or for import, then stamp and persist it
    async fn confirm(
        &self,
        key: RecordKey,
        schema: &ResourceSchema,
        prior: Option<&Object>,
        from: InstanceState,
    ) -> Result<Option<Object>> {
        let Some(mut tree) = self.fetch(key, schema, prior, Some(from)).await? else {
            return Ok(None);
        };
        stamp(&mut tree, schema);
        self.persist(key, &tree).await?;
        Ok(Some(tree))
    }

    /// Finish a transition into `from`
    ///
    /// Success moves the instance on to `to`; a failure moves it back to
    /// `back`. A vanished object has already gone to Gone.
    fn settle(
        &self,
        resource: ResourceRef,
        from: InstanceState,
        to: InstanceState,
        back: InstanceState,
        outcome: Result<Option<Object>>,
    ) -> Result<Object> {
        match outcome {
            Ok(Some(tree)) => {
                self.transition(resource, from, to);
                Ok(tree)
            }
            Ok(None) => Err(Error::remote_not_found(resource)),
            Err(e) => {
                self.transition(resource, from, back);
                Err(e)
            }
        }
    }

    fn map_response(
        &self,
        resource: ResourceRef,
        schema: &ResourceSchema,
        payload: &Payload,
        prior: Option<&Object>,
    ) -> Result<Object> {
        let dropped = mapper::unrecognized_keys(payload, &schema.root);
        if !dropped.is_empty() {
            debug!("Ignoring unrecognized fields for {}: {:?}", resource, dropped);
        }

        let mut tree = mapper::from_payload(payload, &schema.root, prior)
            .map_err(|e| Error::remote_request(resource, e.to_string()))?;

        if let Some(id) = resource.id {
            tree.insert(schema.id_attribute, id);
        }
        Ok(tree)
    }

    async fn load(&self, key: RecordKey, schema: &ResourceSchema) -> Result<Option<Object>> {
        self.state_store
            .get_record(&key)
            .await?
            .map(|record| mapper::decode_state(&record.attributes, &schema.root))
            .transpose()
    }

    async fn persist(&self, key: RecordKey, tree: &Object) -> Result<()> {
        let record = StateRecord::new(key, mapper::encode_state(tree)?);
        self.state_store.set_record(&record).await
    }

    /// Log and publish a failed operation, passing the result through
    fn observe<T>(&self, resource: ResourceRef, operation: Operation, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            let resource = e.resource().unwrap_or(resource);
            error!("Failed to {} {}: {}", operation, resource, e);
            self.emit_event(ReconcileEvent::Failed {
                resource,
                operation,
                error: e.to_string(),
            });
        }
        result
    }

    fn transition(&self, resource: ResourceRef, from: InstanceState, to: InstanceState) {
        debug!("{}: {:?} -> {:?}", resource, from, to);
        self.emit_event(ReconcileEvent::Transition { resource, from, to });
    }

    /// Emit a reconcile event
    fn emit_event(&self, event: ReconcileEvent) {
        // Never block an operation on a slow consumer
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

fn unsupported(schema: &ResourceSchema, operation: Operation) -> Error {
    Error::UnsupportedOperation {
        kind: schema.kind,
        operation: operation.as_str(),
        hint: schema.unsupported_hint,
    }
}

/// Data sources without identifiers only support being read as a whole
fn require_addressable(schema: &ResourceSchema, operation: Operation) -> Result<()> {
    if schema.addressable {
        Ok(())
    } else {
        Err(unsupported(schema, operation))
    }
}

fn parse_identifier(kind: ResourceKind, external_id: &str) -> Result<i64> {
    external_id.trim().parse::<i64>().map_err(|_| {
        Error::configuration(
            ResourceRef::new_instance(kind),
            format!(
                "cannot import '{}': expected a numeric {} identifier",
                external_id, kind
            ),
        )
    })
}

fn remote_error(resource: ResourceRef, err: ApiError) -> Error {
    match err {
        ApiError::NotFound => Error::remote_not_found(resource),
        ApiError::Request(message) => Error::remote_request(resource, message),
    }
}

/// Record the reconciliation time in the descriptor's local timestamp attribute
fn stamp(tree: &mut Object, schema: &ResourceSchema) {
    if let Some(attribute) = schema.timestamp_attribute {
        tree.insert(attribute, AttrValue::string(chrono::Utc::now().to_rfc3339()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_must_be_numeric() {
        assert_eq!(parse_identifier(ResourceKind::Site, " 42 ").unwrap(), 42);

        let err = parse_identifier(ResourceKind::Tunnel, "abc").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(err.resource(), Some(ResourceRef::new_instance(ResourceKind::Tunnel)));
    }

    #[test]
    fn api_errors_keep_resource_context() {
        let resource = ResourceRef::existing(ResourceKind::Site, 3);
        assert!(remote_error(resource, ApiError::NotFound).is_not_found());

        let err = remote_error(resource, ApiError::request("HTTP 401"));
        assert_eq!(err.to_string(), "Remote request failed for site 3: HTTP 401");
    }

    #[test]
    fn data_sources_reject_instance_operations() {
        let schema = ResourceKind::Datacenters.schema();
        match require_addressable(schema, Operation::Read).unwrap_err() {
            Error::UnsupportedOperation { kind, operation, hint } => {
                assert_eq!(kind, ResourceKind::Datacenters);
                assert_eq!(operation, "read");
                assert!(!hint.is_empty());
            }
            other => panic!("expected unsupported operation, got {:?}", other),
        }
        assert!(require_addressable(ResourceKind::Tunnel.schema(), Operation::Delete).is_ok());
    }

    #[test]
    fn stamp_sets_local_timestamp() {
        let schema = ResourceKind::Site.schema();
        let mut tree = schema.root.null_tree();
        stamp(&mut tree, schema);

        let stamped = tree.value("last_updated").as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamped).is_ok());
    }

    #[test]
    fn events_compare_structurally() {
        let event = ReconcileEvent::Transition {
            resource: ResourceRef::existing(ResourceKind::Tunnel, 1),
            from: InstanceState::Present,
            to: InstanceState::Gone,
        };
        assert_eq!(event.clone(), event);
        assert_eq!(Operation::Import.to_string(), "import");
    }
}
