//! # Annotation Parser
//!
//! Parses and validates the secret sync annotation carried by a pod.
//!
//! The annotation value is a small YAML document:
//!
//! ```yaml
//! provider: aws-secretsmanager
//! path: /prod/myapp/database
//! secretName: db-credentials
//! keys:                  # optional, target key -> source key
//!   database: DB_HOST
//!   password: DB_PASSWORD
//! ```
//!
//! Parsing is pure: no network or API access happens here, and the raw value is
//! never logged since users occasionally paste credentials into annotations.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

/// RFC 1123 subdomain, the naming rule for Secrets
static SECRET_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("secret name regex is a valid literal")
});

/// Maximum length of a Kubernetes object name
const MAX_SECRET_NAME_LEN: usize = 253;

/// Reasons an annotation is rejected
///
/// All validation errors are permanent: the annotation will not become valid
/// until the pod itself changes, so they are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("annotation value is empty")]
    EmptyPayload,
    #[error("failed to parse annotation YAML: {0}")]
    MalformedPayload(String),
    #[error("{0} field is required")]
    MissingField(&'static str),
    #[error("secretName '{name}' is not a valid Kubernetes name: {reason}")]
    InvalidSecretName { name: String, reason: String },
    #[error(
        "annotation namespace mismatch: annotation specifies {requested} but pod is in {actual}"
    )]
    NamespaceMismatch { requested: String, actual: String },
}

/// Identity of the pod a request came from, used to correlate events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodIdentity {
    pub name: String,
    pub uid: String,
}

/// A validated secret sync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Registered provider name, e.g. `aws-secretsmanager`
    pub provider: String,
    /// Provider-specific location of the secret
    pub source_path: String,
    /// Name of the Secret to write
    pub secret_name: String,
    /// Namespace the request targets
    ///
    /// Taken from the payload's optional `namespace` field and otherwise from
    /// the pod. The reconciler rejects any value that differs from the pod's.
    pub namespace: String,
    pub pod: PodIdentity,
    /// Target key -> source key. `None` and an empty map both copy every key.
    pub key_mapping: Option<BTreeMap<String, String>>,
}

impl SyncRequest {
    /// Check the requested namespace against the pod's actual namespace
    pub fn ensure_namespace(&self, pod_namespace: &str) -> Result<(), ValidationError> {
        if self.namespace == pod_namespace {
            Ok(())
        } else {
            Err(ValidationError::NamespaceMismatch {
                requested: self.namespace.clone(),
                actual: pod_namespace.to_string(),
            })
        }
    }
}

/// Raw annotation document as written by users
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotationPayload {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    secret_name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    keys: Option<BTreeMap<String, String>>,
}

/// Parse the secret sync annotation of a pod into a [`SyncRequest`]
///
/// # Errors
///
/// - [`ValidationError::EmptyPayload`] when the value is empty or whitespace
/// - [`ValidationError::MalformedPayload`] when the value is not a YAML mapping of the expected shape
/// - [`ValidationError::MissingField`] when `provider`, `path` or `secretName` is absent or empty
/// - [`ValidationError::InvalidSecretName`] when `secretName` cannot name a Secret
pub fn parse_annotation(
    raw: &str,
    namespace: &str,
    pod_name: &str,
    pod_uid: &str,
) -> Result<SyncRequest, ValidationError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::EmptyPayload);
    }

    let payload: AnnotationPayload = serde_yaml::from_str(raw).map_err(|e| malformed(&e))?;

    let provider = required(payload.provider, "provider")?;
    let source_path = required(payload.path, "path")?;
    let secret_name = required(payload.secret_name, "secretName")?;
    validate_secret_name(&secret_name)?;

    let namespace = payload
        .namespace
        .map(|ns| ns.trim().to_string())
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| namespace.to_string());

    Ok(SyncRequest {
        provider,
        source_path,
        secret_name,
        namespace,
        pod: PodIdentity {
            name: pod_name.to_string(),
            uid: pod_uid.to_string(),
        },
        key_mapping: payload.keys,
    })
}

/// Describe a YAML error by position only
///
/// serde_yaml messages quote the offending scalar, which may be a credential.
fn malformed(err: &serde_yaml::Error) -> ValidationError {
    const EXPECTED: &str = "expected a mapping with provider, path, secretName and optional keys";
    let reason = match err.location() {
        Some(loc) => format!("{EXPECTED} (line {}, column {})", loc.line(), loc.column()),
        None => EXPECTED.to_string(),
    };
    ValidationError::MalformedPayload(reason)
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

/// Validate a Secret name (RFC 1123 subdomain, at most 253 characters)
pub fn validate_secret_name(name: &str) -> Result<(), ValidationError> {
    if name.len() > MAX_SECRET_NAME_LEN {
        return Err(ValidationError::InvalidSecretName {
            name: name.to_string(),
            reason: format!(
                "exceeds maximum length of {MAX_SECRET_NAME_LEN} characters (got {})",
                name.len()
            ),
        });
    }

    if !SECRET_NAME_REGEX.is_match(name) {
        return Err(ValidationError::InvalidSecretName {
            name: name.to_string(),
            reason: "must be lowercase alphanumeric, '-' or '.', and start and end with an alphanumeric character".to_string(),
        });
    }

    Ok(())
}
