//! # Types
//!
//! Core types for the reconciler.

use crate::config::SharedControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::events::EventSink;
use crate::controller::store::{ResourceStore, StoreError};
use crate::provider::{FetchContext, FetchError, ProviderRegistry};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retryable reconciliation failures
///
/// Permanent failures never surface here; they end the reconciliation with a
/// [`SyncOutcome`] and wait for the pod to change.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to load pod {key}: {source}")]
    PodLoad {
        key: PodKey,
        #[source]
        source: StoreError,
    },
    #[error("transient failure fetching {path} from {provider}: {source}")]
    TransientFetch {
        provider: String,
        path: String,
        #[source]
        source: FetchError,
    },
    #[error("failed to write secret {namespace}/{name}: {source}")]
    SecretWrite {
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },
}

impl ReconcilerError {
    /// Short label for requeue metrics
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcilerError::PodLoad { .. } => "pod-load",
            ReconcilerError::TransientFetch { .. } => "transient-fetch",
            ReconcilerError::SecretWrite { .. } => "secret-write",
        }
    }
}

/// Namespace and name of a pod
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a pod object; pods are always namespaced
    #[must_use]
    pub fn from_pod(pod: &Pod) -> Self {
        Self::new(pod.namespace().unwrap_or_default(), pod.name_any())
    }
}

impl std::fmt::Display for PodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<&ObjectRef<Pod>> for PodKey {
    fn from(obj: &ObjectRef<Pod>) -> Self {
        Self::new(obj.namespace.clone().unwrap_or_default(), obj.name.clone())
    }
}

/// Terminal result of one reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Pod no longer exists
    PodGone,
    /// Pod does not request a secret
    NoAnnotation,
    /// Annotation failed parsing, validation or the namespace check
    InvalidAnnotation,
    /// Annotation names a provider that is not registered
    ProviderUnsupported,
    /// Provider failed permanently (not found, access denied, malformed)
    FetchFailed,
    /// The API server refused the write (RBAC)
    WriteRejected,
    /// Secret did not exist and was created
    Created,
    /// Existing Secret was replaced with fresh data
    Updated,
}

impl SyncOutcome {
    /// Label used in metrics and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::PodGone => "pod-gone",
            SyncOutcome::NoAnnotation => "no-annotation",
            SyncOutcome::InvalidAnnotation => "invalid-annotation",
            SyncOutcome::ProviderUnsupported => "provider-unsupported",
            SyncOutcome::FetchFailed => "fetch-failed",
            SyncOutcome::WriteRejected => "write-rejected",
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
        }
    }
}

/// Backoff state for a specific pod
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            backoff: ExponentialBackoff::new(min, max),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Source of the current time, replaceable in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Shared reconciliation context
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ResourceStore>,
    pub events: Arc<dyn EventSink>,
    // Built once at startup, read-only afterwards
    pub registry: Arc<ProviderRegistry>,
    pub config: SharedControllerConfig,
    pub clock: Clock,
    // Cancelled on shutdown; aborts in-flight fetches and writes
    pub shutdown: CancellationToken,
    // Backoff state per pod (identified by namespace/name)
    // Owned by the error_policy() layer, reset on success
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        events: Arc<dyn EventSink>,
        registry: Arc<ProviderRegistry>,
        config: SharedControllerConfig,
    ) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        Self {
            store,
            events,
            registry,
            config,
            clock,
            shutdown: CancellationToken::new(),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Current time according to the configured clock
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Deadline and cancellation for one provider fetch
    #[must_use]
    pub fn fetch_context(&self) -> FetchContext {
        FetchContext::new(self.config.fetch_timeout(), self.shutdown.child_token())
    }

    /// Record a failure for `key` and return the delay before the next attempt
    /// together with the number of consecutive failures
    pub fn next_backoff(&self, key: &PodKey) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_insert_with(|| {
                    BackoffState::new(
                        self.config.backoff_start_duration(),
                        self.config.backoff_max_duration(),
                    )
                });
                state.increment_error();
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!(
                    "Failed to lock backoff_states: {}, using default backoff",
                    e
                );
                (self.config.backoff_start_duration(), 0)
            }
        }
    }

    /// Forget the failure history of `key`
    pub fn reset_backoff(&self, key: &PodKey) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                states.remove(&key.to_string());
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, backoff not reset", e);
            }
        }
    }
}
