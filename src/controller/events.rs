//! # Kubernetes Events
//!
//! Events recorded against a pod so users see sync results in
//! `kubectl describe pod`.
//!
//! Publishing is fire-and-forget: a failure is logged as a warning and never
//! fails the reconciliation. Notes name secrets, providers and paths but never
//! carry secret values.

use crate::observability::metrics;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Destination for Kubernetes events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event about `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Event sink backed by `kube::runtime::events::Recorder`
pub struct KubeEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

impl KubeEventSink {
    /// Create a sink reporting as `controller_name`
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        match self.recorder.publish(&event, resource_ref).await {
            Ok(()) => metrics::increment_events_published(reason),
            Err(e) => {
                warn!(
                    reason,
                    action,
                    pod.name = resource_ref.name.as_deref().unwrap_or_default(),
                    pod.namespace = resource_ref.namespace.as_deref().unwrap_or_default(),
                    error = %e,
                    "Failed to publish Kubernetes event"
                );
            }
        }
    }
}

/// Event reasons shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Secret was created or updated from the external source
    pub const SECRET_SYNC_SUCCESS: &str = "SecretSyncSuccess";
    /// Secret could not be written to the cluster
    pub const SECRET_SYNC_FAILED: &str = "SecretSyncFailed";
    /// Sync annotation could not be parsed or validated
    pub const ANNOTATION_INVALID: &str = "AnnotationInvalid";
    /// Annotation names a provider that is not registered
    pub const PROVIDER_UNSUPPORTED: &str = "ProviderUnsupported";
    /// External secret could not be fetched
    pub const SECRET_FETCH_FAILED: &str = "SecretFetchFailed";
}

/// Event actions shown in the ACTION column of `kubectl get events`
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}
