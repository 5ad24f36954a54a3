//! # Resource Store
//!
//! Read/write access to the Pods and Secrets the reconciler works with.
//!
//! [`ResourceStore`] is the seam between reconciliation logic and the API
//! server. [`KubeResourceStore`] is the production implementation; tests use an
//! in-memory store that enforces the same `resourceVersion` preconditions.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{ListParams, PostParams};
use kube::{Api, Client};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Store access failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Object changed or vanished since it was read
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },
    /// The controller is not allowed to perform the operation
    #[error("forbidden to write {kind} {name}: {message}")]
    Forbidden {
        kind: &'static str,
        name: String,
        message: String,
    },
    /// The API server rejected the object itself (400 Bad Request, 422 Invalid)
    #[error("invalid {kind} {name}: {message}")]
    Invalid {
        kind: &'static str,
        name: String,
        message: String,
    },
    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("request to the API server timed out")]
    Timeout,
    #[error("request cancelled by shutdown")]
    Cancelled,
}

impl StoreError {
    /// Whether retrying the whole reconciliation may succeed
    ///
    /// `Forbidden` needs an RBAC fix and `Invalid` needs different input, so
    /// neither can succeed on retry. Everything else can.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            StoreError::Forbidden { .. } | StoreError::Invalid { .. }
        )
    }

    /// Map a kube client error for an operation on `kind`/`name`
    ///
    /// A 404 on replace means the object was deleted after it was read, which is
    /// the same race as a version conflict.
    #[must_use]
    pub fn from_kube(err: kube::Error, kind: &'static str, name: &str, replace: bool) -> Self {
        match err {
            kube::Error::Api(api_err) => match api_err.code {
                409 => StoreError::Conflict {
                    kind,
                    name: name.to_string(),
                    message: api_err.message.clone(),
                },
                404 if replace => StoreError::Conflict {
                    kind,
                    name: name.to_string(),
                    message: api_err.message.clone(),
                },
                403 => StoreError::Forbidden {
                    kind,
                    name: name.to_string(),
                    message: api_err.message.clone(),
                },
                400 | 422 => StoreError::Invalid {
                    kind,
                    name: name.to_string(),
                    message: api_err.message.clone(),
                },
                code => StoreError::Api {
                    code,
                    message: api_err.message.clone(),
                },
            },
            other => StoreError::Api {
                code: 0,
                message: other.to_string(),
            },
        }
    }

    /// Short label for metrics and logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Conflict { .. } => "conflict",
            StoreError::Forbidden { .. } => "forbidden",
            StoreError::Invalid { .. } => "invalid",
            StoreError::Api { .. } => "api",
            StoreError::Timeout => "timeout",
            StoreError::Cancelled => "cancelled",
        }
    }
}

/// Run a store call until it completes, `timeout` passes, or `cancel` fires
///
/// # Errors
///
/// Returns [`StoreError::Timeout`] or [`StoreError::Cancelled`], otherwise the
/// call's own result.
pub async fn with_deadline<T, F>(
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    // A call that is already complete wins over a concurrent cancellation
    tokio::select! {
        biased;
        res = tokio::time::timeout(timeout, fut) => match res {
            Ok(inner) => inner,
            Err(_elapsed) => Err(StoreError::Timeout),
        },
        () = cancel.cancelled() => Err(StoreError::Cancelled),
    }
}

/// Access to Pods and Secrets
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a pod, `None` if it does not exist
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, StoreError>;

    /// List all pods in a namespace
    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, StoreError>;

    /// Fetch a secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str)
        -> Result<Option<Secret>, StoreError>;

    /// Create a secret; fails with `Conflict` if it already exists
    async fn create_secret(&self, namespace: &str, secret: &Secret)
        -> Result<Secret, StoreError>;

    /// Replace a secret
    ///
    /// `secret.metadata.resource_version` is a precondition: a stale version
    /// fails with `Conflict`.
    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, StoreError>;
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
}

impl std::fmt::Debug for KubeResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeResourceStore").finish_non_exhaustive()
    }
}

impl KubeResourceStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(e, "Pod", name, false))
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| StoreError::from_kube(e, "Pod", namespace, false))
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(e, "Secret", name, false))
    }

    async fn create_secret(
        &self,
        namespace: &str,
        secret: &Secret,
    ) -> Result<Secret, StoreError> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret)
            .await
            .map_err(|e| StoreError::from_kube(e, "Secret", name, false))
    }

    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), secret)
            .await
            .map_err(|e| StoreError::from_kube(e, "Secret", name, true))
    }
}
