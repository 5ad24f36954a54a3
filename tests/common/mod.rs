//! Common test utilities
//!
//! In-memory fakes for the resource store, the event sink and secret providers,
//! so reconciliation runs end to end without a cluster or an AWS account.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use k8s_openapi::api::core::v1::{ObjectReference, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::events::EventType;
use pod_secret_controller::config::ControllerConfig;
use pod_secret_controller::constants::SYNC_ANNOTATION;
use pod_secret_controller::controller::events::EventSink;
use pod_secret_controller::controller::reconciler::{Clock, Reconciler};
use pod_secret_controller::controller::store::{ResourceStore, StoreError};
use pod_secret_controller::provider::{
    ExternalSecretData, FetchContext, FetchError, ProviderRegistry, SecretProvider,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const AWS: &str = "aws-secretsmanager";

type ObjectKey = (String, String);

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

/// In-memory [`ResourceStore`] enforcing `resourceVersion` preconditions
#[derive(Default)]
pub struct MemoryStore {
    pods: Mutex<BTreeMap<ObjectKey, Pod>>,
    secrets: Mutex<BTreeMap<ObjectKey, Secret>>,
    next_version: AtomicU64,
    write_failure: Mutex<Option<StoreError>>,
    race_next_replace: AtomicBool,
    secret_calls: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_pod(&self, pod: Pod) {
        let k = key(
            pod.metadata.namespace.as_deref().unwrap(),
            pod.metadata.name.as_deref().unwrap(),
        );
        self.pods.lock().unwrap().insert(k, pod);
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) {
        self.pods.lock().unwrap().remove(&key(namespace, name));
    }

    /// Store a secret directly, as another writer would
    pub fn put_secret(&self, mut secret: Secret) {
        secret.metadata.resource_version = Some(self.bump_version());
        let k = key(
            secret.metadata.namespace.as_deref().unwrap(),
            secret.metadata.name.as_deref().unwrap(),
        );
        self.secrets.lock().unwrap().insert(k, secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn delete_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().remove(&key(namespace, name))
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.lock().unwrap().len()
    }

    /// Fail every subsequent create or replace with `err`
    pub fn fail_writes_with(&self, err: StoreError) {
        *self.write_failure.lock().unwrap() = Some(err);
    }

    pub fn clear_write_failure(&self) {
        *self.write_failure.lock().unwrap() = None;
    }

    /// Let a concurrent writer modify the secret between the next read and replace
    pub fn race_next_replace(&self) {
        self.race_next_replace.store(true, Ordering::SeqCst);
    }

    /// Number of Secret reads and writes made through the store trait
    pub fn secret_calls(&self) -> usize {
        self.secret_calls.load(Ordering::SeqCst)
    }

    /// Number of successful Secret writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn bump_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn check_write_failure(&self) -> Result<(), StoreError> {
        match self.write_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Reject data keys the API server would refuse with 422 Invalid
fn validate_data_keys(name: &str, secret: &Secret) -> Result<(), StoreError> {
    let valid = |k: &str| {
        !k.is_empty()
            && k
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match secret.data.iter().flatten().find(|(k, _)| !valid(k.as_str())) {
        Some((k, _)) => Err(StoreError::Invalid {
            kind: "Secret",
            name: name.to_string(),
            message: format!("data[{k}]: a valid config key must consist of alphanumeric characters, '-', '_' or '.'"),
        }),
        None => Ok(()),
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, StoreError> {
        Ok(self.pods.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, StoreError> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, StoreError> {
        self.secret_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, StoreError> {
        self.secret_calls.fetch_add(1, Ordering::SeqCst);
        self.check_write_failure()?;

        assert_eq!(secret.metadata.namespace.as_deref(), Some(namespace));
        let name = secret.metadata.name.clone().unwrap();
        validate_data_keys(&name, secret)?;
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&key(namespace, &name)) {
            return Err(StoreError::Conflict {
                kind: "Secret",
                name,
                message: "already exists".to_string(),
            });
        }

        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(self.bump_version());
        secrets.insert(key(namespace, &name), stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, StoreError> {
        self.secret_calls.fetch_add(1, Ordering::SeqCst);
        self.check_write_failure()?;
        validate_data_keys(name, secret)?;

        if self.race_next_replace.swap(false, Ordering::SeqCst) {
            let version = self.bump_version();
            if let Some(current) = self.secrets.lock().unwrap().get_mut(&key(namespace, name)) {
                current.metadata.resource_version = Some(version);
            }
        }

        let mut secrets = self.secrets.lock().unwrap();
        let Some(current) = secrets.get(&key(namespace, name)) else {
            return Err(StoreError::Conflict {
                kind: "Secret",
                name: name.to_string(),
                message: "not found".to_string(),
            });
        };
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: "Secret",
                name: name.to_string(),
                message: "the object has been modified".to_string(),
            });
        }

        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(self.bump_version());
        secrets.insert(key(namespace, name), stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }
}

/// An event captured by [`RecordingEvents`]
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub pod: String,
    pub type_: EventType,
    pub reason: String,
    pub action: String,
    pub note: String,
}

/// [`EventSink`] that keeps every event in memory
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            pod: resource_ref.name.clone().unwrap_or_default(),
            type_,
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.unwrap_or_default(),
        });
    }
}

/// Provider returning a configurable response and counting calls
pub struct FakeProvider {
    name: String,
    response: Mutex<Result<ExternalSecretData, FetchError>>,
    calls: AtomicUsize,
    paths: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn returning(name: &str, data: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            response: Mutex::new(Ok(secret_data(data))),
            calls: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &str, err: FetchError) -> Arc<Self> {
        let provider = Self::returning(name, &[]);
        provider.respond_with(Err(err));
        provider
    }

    pub fn respond_with(&self, response: Result<ExternalSecretData, FetchError>) {
        *self.response.lock().unwrap() = response;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        _ctx: &FetchContext,
        path: &str,
    ) -> Result<ExternalSecretData, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.paths.lock().unwrap().push(path.to_string());
        self.response.lock().unwrap().clone()
    }
}

/// Provider that never answers; only the fetch deadline or shutdown ends it
pub struct HangingProvider;

#[async_trait]
impl SecretProvider for HangingProvider {
    fn name(&self) -> &str {
        AWS
    }

    async fn fetch(
        &self,
        ctx: &FetchContext,
        _path: &str,
    ) -> Result<ExternalSecretData, FetchError> {
        ctx.run(futures::future::pending()).await
    }
}

pub fn secret_data(pairs: &[(&str, &str)]) -> ExternalSecretData {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn registry_with(provider: Arc<dyn SecretProvider>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register(provider);
    Arc::new(registry)
}

/// Clock starting at a fixed instant and advancing one minute per call
pub fn ticking_clock() -> Clock {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let ticks = Arc::new(AtomicI64::new(0));
    Arc::new(move || -> DateTime<Utc> {
        start + ChronoDuration::minutes(ticks.fetch_add(1, Ordering::SeqCst))
    })
}

pub fn reconciler(
    store: &Arc<MemoryStore>,
    events: &Arc<RecordingEvents>,
    registry: Arc<ProviderRegistry>,
) -> Reconciler {
    Reconciler::new(
        Arc::clone(store) as Arc<dyn ResourceStore>,
        Arc::clone(events) as Arc<dyn EventSink>,
        registry,
        Arc::new(ControllerConfig::default()),
    )
    .with_clock(ticking_clock())
}

pub fn annotation(provider: &str, path: &str, secret_name: &str) -> String {
    format!("provider: {provider}\npath: {path}\nsecretName: {secret_name}\n")
}

pub fn pod(namespace: &str, name: &str, annotation: Option<&str>) -> Pod {
    let annotations = annotation.map(|value| {
        BTreeMap::from([(SYNC_ANNOTATION.to_string(), value.to_string())])
    });
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{namespace}-{name}")),
            annotations,
            ..ObjectMeta::default()
        },
        ..Pod::default()
    }
}

/// Decoded string data of a secret
pub fn decoded(secret: &Secret) -> BTreeMap<String, String> {
    secret
        .data
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, String::from_utf8(v.0).unwrap()))
        .collect()
}
