//! Test doubles and common utilities for reconciliation contract tests
//!
//! `MockRemoteApi` keeps remote objects in memory and behaves like the
//! management API where it matters for reconciliation:
//! - Identifiers and server-side fields are assigned on create
//! - Tunnel create responses carry the collection uri, reads the item uri
//! - Tunnel secrets are accepted but never returned by `get`
//! - Updates merge the sent fields; absent fields are left untouched
//! - Get, update and delete can be slowed down to observe overlapping calls
#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use umbrella_core::traits::{ApiError, RemoteApi};
use umbrella_core::{
    AttrValue, InstanceState, MemoryStateStore, Object, Payload, ReconcileEvent, Reconciler, ReconcilerConfig,
    ResourceKind,
};

pub const CREATED_AT: &str = "2024-01-01T00:00:00Z";
pub const MODIFIED_AT: &str = "2024-02-01T00:00:00Z";
pub const TUNNELS_URI: &str = "/deployments/v2/tunnels";

/// In-memory stand-in for the Umbrella management API
pub struct MockRemoteApi {
    objects: Arc<Mutex<BTreeMap<(ResourceKind, i64), Payload>>>,
    next_id: Arc<AtomicI64>,
    create_call_count: Arc<AtomicUsize>,
    get_call_count: Arc<AtomicUsize>,
    update_call_count: Arc<AtomicUsize>,
    delete_call_count: Arc<AtomicUsize>,
    list_call_count: Arc<AtomicUsize>,
    datacenters_call_count: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    latency: Arc<Mutex<Option<Duration>>>,
    vanish_after_update: Arc<AtomicBool>,
    datacenters: Arc<Mutex<Payload>>,
    last_create: Arc<Mutex<Option<Payload>>>,
    last_update: Arc<Mutex<Option<Payload>>>,
    failure: Arc<Mutex<Option<String>>>,
}

/// Marks one get/update/delete as running until dropped
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockRemoteApi {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI64::new(100)),
            create_call_count: Arc::new(AtomicUsize::new(0)),
            get_call_count: Arc::new(AtomicUsize::new(0)),
            update_call_count: Arc::new(AtomicUsize::new(0)),
            delete_call_count: Arc::new(AtomicUsize::new(0)),
            list_call_count: Arc::new(AtomicUsize::new(0)),
            datacenters_call_count: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            latency: Arc::new(Mutex::new(None)),
            vanish_after_update: Arc::new(AtomicBool::new(false)),
            datacenters: Arc::new(Mutex::new(datacenter_fixture())),
            last_create: Arc::new(Mutex::new(None)),
            last_update: Arc::new(Mutex::new(None)),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a new MockRemoteApi that shares objects and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            objects: Arc::clone(&other.objects),
            next_id: Arc::clone(&other.next_id),
            create_call_count: Arc::clone(&other.create_call_count),
            get_call_count: Arc::clone(&other.get_call_count),
            update_call_count: Arc::clone(&other.update_call_count),
            delete_call_count: Arc::clone(&other.delete_call_count),
            list_call_count: Arc::clone(&other.list_call_count),
            datacenters_call_count: Arc::clone(&other.datacenters_call_count),
            in_flight: Arc::clone(&other.in_flight),
            max_in_flight: Arc::clone(&other.max_in_flight),
            latency: Arc::clone(&other.latency),
            vanish_after_update: Arc::clone(&other.vanish_after_update),
            datacenters: Arc::clone(&other.datacenters),
            last_create: Arc::clone(&other.last_create),
            last_update: Arc::clone(&other.last_update),
            failure: Arc::clone(&other.failure),
        }
    }

    pub fn create_call_count(&self) -> usize {
        self.create_call_count.load(Ordering::SeqCst)
    }

    pub fn get_call_count(&self) -> usize {
        self.get_call_count.load(Ordering::SeqCst)
    }

    pub fn update_call_count(&self) -> usize {
        self.update_call_count.load(Ordering::SeqCst)
    }

    pub fn delete_call_count(&self) -> usize {
        self.delete_call_count.load(Ordering::SeqCst)
    }

    pub fn list_call_count(&self) -> usize {
        self.list_call_count.load(Ordering::SeqCst)
    }

    pub fn datacenters_call_count(&self) -> usize {
        self.datacenters_call_count.load(Ordering::SeqCst)
    }

    /// Total number of remote calls of any kind
    pub fn total_calls(&self) -> usize {
        self.create_call_count()
            + self.get_call_count()
            + self.update_call_count()
            + self.delete_call_count()
            + self.list_call_count()
            + self.datacenters_call_count()
    }

    /// Highest number of get/update/delete calls seen running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Hold every get/update/delete for `latency` before it answers
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Make the next updated object disappear right after the write
    pub fn vanish_after_update(&self, enabled: bool) {
        self.vanish_after_update.store(enabled, Ordering::SeqCst);
    }

    /// Replace the datacenter list answer
    pub fn set_datacenters(&self, payload: Value) {
        *self.datacenters.lock().unwrap() =
            payload.as_object().cloned().expect("payload must be an object");
    }

    /// Payload sent by the last create call
    pub fn last_create(&self) -> Option<Payload> {
        self.last_create.lock().unwrap().clone()
    }

    /// Payload sent by the last update call
    pub fn last_update(&self) -> Option<Payload> {
        self.last_update.lock().unwrap().clone()
    }

    /// Make every subsequent call fail with a request error (None to recover)
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock().unwrap() = message.map(str::to_string);
    }

    /// Seed a remote object directly
    pub fn insert(&self, kind: ResourceKind, id: i64, payload: Value) {
        let payload = payload.as_object().cloned().expect("payload must be an object");
        self.objects.lock().unwrap().insert((kind, id), payload);
    }

    /// Remove a remote object behind the reconciler's back
    pub fn vanish(&self, kind: ResourceKind, id: i64) {
        self.objects.lock().unwrap().remove(&(kind, id));
    }

    /// Stored remote object, unfiltered
    pub fn stored(&self, kind: ResourceKind, id: i64) -> Option<Payload> {
        self.objects.lock().unwrap().get(&(kind, id)).cloned()
    }

    async fn begin_call(&self) -> InFlight {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let call = InFlight(Arc::clone(&self.in_flight));

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        call
    }

    fn check_failure(&self) -> Result<(), ApiError> {
        match self.failure.lock().unwrap().as_ref() {
            Some(message) => Err(ApiError::request(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl RemoteApi for MockRemoteApi {
    async fn create(&self, kind: ResourceKind, payload: &Payload) -> Result<Payload, ApiError> {
        self.create_call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_create.lock().unwrap() = Some(payload.clone());
        self.check_failure()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = payload.clone();
        let response = match kind {
            ResourceKind::Site => {
                stored.insert("siteId".into(), json!(id));
                stored.insert("originId".into(), json!(id + 1000));
                stored.insert("isDefault".into(), json!(false));
                stored.insert("createdAt".into(), json!(CREATED_AT));
                stored.insert("modifiedAt".into(), json!(CREATED_AT));
                stored.clone()
            }
            ResourceKind::Tunnel => {
                fill_tunnel(id, &mut stored);
                let mut response = stored.clone();
                response.insert("uri".into(), json!(TUNNELS_URI));
                response
            }
            ResourceKind::VirtualAppliance | ResourceKind::Datacenters => {
                return Err(ApiError::request("HTTP 405: method not allowed"));
            }
        };

        self.objects.lock().unwrap().insert((kind, id), stored);
        Ok(response)
    }

    async fn get(&self, kind: ResourceKind, id: i64) -> Result<Payload, ApiError> {
        self.get_call_count.fetch_add(1, Ordering::SeqCst);
        let _call = self.begin_call().await;
        self.check_failure()?;

        let mut payload = self.stored(kind, id).ok_or(ApiError::NotFound)?;
        if kind == ResourceKind::Tunnel {
            strip_secret(&mut payload);
        }
        Ok(payload)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: i64,
        payload: &Payload,
    ) -> Result<Payload, ApiError> {
        self.update_call_count.fetch_add(1, Ordering::SeqCst);
        *self.last_update.lock().unwrap() = Some(payload.clone());
        let _call = self.begin_call().await;
        self.check_failure()?;

        let mut objects = self.objects.lock().unwrap();
        let stored = objects.get_mut(&(kind, id)).ok_or(ApiError::NotFound)?;
        merge(stored, payload);
        stored.insert("modifiedAt".into(), json!(MODIFIED_AT));
        if kind == ResourceKind::Tunnel {
            fill_tunnel(id, stored);
        }
        if self.vanish_after_update.swap(false, Ordering::SeqCst) {
            objects.remove(&(kind, id));
        }

        // Deliberately incomplete: callers must re-read
        Ok(Payload::new())
    }

    async fn delete(&self, kind: ResourceKind, id: i64) -> Result<(), ApiError> {
        self.delete_call_count.fetch_add(1, Ordering::SeqCst);
        let _call = self.begin_call().await;
        self.check_failure()?;

        match self.objects.lock().unwrap().remove(&(kind, id)) {
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound),
        }
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<Payload>, ApiError> {
        self.list_call_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, payload)| payload.clone())
            .collect())
    }

    async fn list_datacenters(&self) -> Result<Payload, ApiError> {
        self.datacenters_call_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.datacenters.lock().unwrap().clone())
    }

    fn client_name(&self) -> &'static str {
        "mock"
    }
}

/// Two continents, one of them without cities
fn datacenter_fixture() -> Payload {
    let fixture = json!({
        "continents": [
            {
                "name": "Europe",
                "cities": [
                    {
                        "latitude": "52.3676",
                        "longitude": "4.9041",
                        "name": "Amsterdam",
                        "dc": "AMS1",
                        "range": "146.112.56.0/24",
                        "fqdn": "ams1.edc.example.net"
                    },
                    {
                        "latitude": "50.1109",
                        "longitude": "8.6821",
                        "name": "Frankfurt",
                        "dc": "FRA1",
                        "range": "146.112.59.0/24",
                        "fqdn": "fra1.edc.example.net",
                        "capacity": "high"
                    }
                ]
            },
            { "name": "Antarctica", "cities": [] }
        ]
    });
    match fixture {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Server-side defaults and computed fields of a tunnel
fn fill_tunnel(id: i64, stored: &mut Payload) {
    stored.insert("id".into(), json!(id));
    stored.insert("uri".into(), json!(format!("{}/{}", TUNNELS_URI, id)));
    stored.entry("createdAt").or_insert(json!(CREATED_AT));
    stored.entry("modifiedAt").or_insert(json!(CREATED_AT));
    stored.entry("serviceType").or_insert(json!("SIG"));
    stored.entry("siteOriginId").or_insert(json!(500));

    let transport = object_entry(stored, "transport");
    transport.entry("protocol").or_insert(json!("ipsec"));

    let client = object_entry(stored, "client");
    client.entry("deviceType").or_insert(json!("other"));
    let auth = object_entry(client, "authentication");
    auth.entry("type").or_insert(json!("PSK"));
    let params = object_entry(auth, "parameters");
    params.entry("modifiedAt").or_insert(json!(CREATED_AT));

    // The prefix sent under "id" becomes the full tunnel identity
    let prefix = params
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("tunnel")
        .to_string();
    if !prefix.contains('@') {
        params.insert("id".into(), json!(format!("{}@{}-umbrella.com", prefix, id)));
    }
}

fn object_entry<'a>(payload: &'a mut Payload, key: &str) -> &'a mut Payload {
    let slot = payload
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Payload::new()));
    if !slot.is_object() {
        *slot = Value::Object(Payload::new());
    }
    slot.as_object_mut().unwrap()
}

fn strip_secret(payload: &mut Payload) {
    if let Some(params) = payload
        .get_mut("client")
        .and_then(|c| c.get_mut("authentication"))
        .and_then(|a| a.get_mut("parameters"))
        .and_then(Value::as_object_mut)
    {
        params.remove("secret");
    }
}

fn merge(target: &mut Payload, patch: &Payload) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(inner)) => merge(existing, inner),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Reconciler wired to a mock API and a fresh memory store
pub fn reconciler(
    api: &Arc<MockRemoteApi>,
) -> (Reconciler, mpsc::Receiver<ReconcileEvent>, MemoryStateStore) {
    let store = MemoryStateStore::new();
    let (reconciler, events) = Reconciler::new(
        api.clone(),
        Arc::new(store.clone()),
        &ReconcilerConfig::default(),
    )
    .expect("reconciler construction succeeds");
    (reconciler, events, store)
}

/// Drain every event currently queued
pub fn drain(events: &mut mpsc::Receiver<ReconcileEvent>) -> Vec<ReconcileEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Lifecycle moves among `events`, in order
pub fn transitions(events: &[ReconcileEvent]) -> Vec<(InstanceState, InstanceState)> {
    events
        .iter()
        .filter_map(|event| match event {
            ReconcileEvent::Transition { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}

/// A desired tree as the host plans it: every attribute Unknown except `set`
pub fn plan(kind: ResourceKind, set: &[(&[&str], AttrValue)]) -> Object {
    let mut tree = kind.schema().root.skeleton(&AttrValue::Unknown);
    for (path, value) in set {
        tree.set_path(path, value.clone()).expect("path exists in the descriptor");
    }
    tree
}

/// Tunnel desired tree used by most scenarios
pub fn branch_tunnel() -> Object {
    plan(
        ResourceKind::Tunnel,
        &[
            (&["name"], AttrValue::string("branch-1")),
            (&["network_cidrs"], AttrValue::Null),
            (
                &["client", "authentication", "type"],
                AttrValue::string("PSK"),
            ),
            (
                &["client", "authentication", "parameters", "id_prefix"],
                AttrValue::string("branch"),
            ),
            (
                &["client", "authentication", "parameters", "secret"],
                AttrValue::string("s3cr3t"),
            ),
        ],
    )
}

/// Site desired tree
pub fn site(name: &str) -> Object {
    plan(ResourceKind::Site, &[(&["name"], AttrValue::string(name))])
}

/// Path of the tunnel secret
pub const SECRET: &[&str] = &["client", "authentication", "parameters", "secret"];
