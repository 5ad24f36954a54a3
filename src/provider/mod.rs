//! # Provider Modules
//!
//! External secret sources the controller can read from.
//!
//! Each provider implements [`SecretProvider`]: given a provider-specific path it
//! returns a flat map of string keys to string values. Providers never cache;
//! every fetch is a live lookup so the Secret is current as of the latest
//! reconciliation.
//!
//! Failures are classified into [`FetchError`] variants. The reconciler uses
//! [`FetchError::is_transient`] to decide whether a pod is retried with backoff
//! or left alone until it changes.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod aws;
pub mod registry;

pub use registry::{default_registry, ProviderRegistry};

/// Flat key/value data returned by a provider
pub type ExternalSecretData = BTreeMap<String, String>;

/// Provider fetch failures
///
/// Messages never include secret values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("secret not found at path {path}")]
    NotFound { path: String },
    #[error("access denied reading {path}: {message}")]
    AccessDenied { path: String, message: String },
    #[error("provider throttled the request: {message}")]
    Throttled { message: String },
    #[error("provider unavailable: {message}")]
    Unavailable { message: String },
    #[error("secret at {path} is not valid key/value data: {reason}")]
    MalformedResponse { path: String, reason: String },
    #[error("fetch cancelled or timed out")]
    Cancelled,
}

impl FetchError {
    /// Whether retrying later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Throttled { .. } | FetchError::Unavailable { .. } | FetchError::Cancelled
        )
    }

    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::NotFound { .. } => "not_found",
            FetchError::AccessDenied { .. } => "access_denied",
            FetchError::Throttled { .. } => "throttled",
            FetchError::Unavailable { .. } => "unavailable",
            FetchError::MalformedResponse { .. } => "malformed_response",
            FetchError::Cancelled => "cancelled",
        }
    }
}

/// Deadline and cancellation for one provider call
#[derive(Debug, Clone)]
pub struct FetchContext {
    timeout: Duration,
    cancel: CancellationToken,
}

impl FetchContext {
    #[must_use]
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// Run `fut` until it completes, the deadline passes, or the token is cancelled
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] on timeout or cancellation, otherwise the
    /// future's own result.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        tokio::select! {
            () = self.cancel.cancelled() => Err(FetchError::Cancelled),
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_elapsed) => Err(FetchError::Cancelled),
            },
        }
    }
}

/// Provider trait for external secret sources
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Provider identifier used in annotations (e.g. `aws-secretsmanager`)
    fn name(&self) -> &str;

    /// Fetch the secret stored at `path` as flat key/value data
    async fn fetch(&self, ctx: &FetchContext, path: &str)
        -> Result<ExternalSecretData, FetchError>;
}

/// Convert a JSON secret document into flat string data
///
/// Strings pass through, numbers and booleans are stringified, `null` becomes the
/// empty string and nested arrays/objects are kept as compact JSON text so no
/// data is silently dropped.
///
/// # Errors
///
/// Returns [`FetchError::MalformedResponse`] if the document is not a JSON object.
pub fn flatten_json_secret(path: &str, raw: &str) -> Result<ExternalSecretData, FetchError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| FetchError::MalformedResponse {
            path: path.to_string(),
            reason: format!("secret value is not valid JSON: {e}"),
        })?;

    let serde_json::Value::Object(map) = value else {
        return Err(FetchError::MalformedResponse {
            path: path.to_string(),
            reason: "secret value must be a JSON object".to_string(),
        });
    };

    Ok(map
        .into_iter()
        .map(|(key, value)| (key, scalar_to_string(value)))
        .collect())
}

fn scalar_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        composite @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
            composite.to_string()
        }
    }
}
