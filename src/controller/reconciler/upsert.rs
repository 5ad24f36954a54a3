//! # Upsert
//!
//! Creates or replaces the managed Secret.
//!
//! Replace reuses the Secret that was just read, including its
//! `resourceVersion`, so a concurrent writer makes the request fail with a
//! conflict instead of being silently overwritten.

use crate::constants::{
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, SOURCE_PATH_ANNOTATION, SYNCED_AT_ANNOTATION,
};
use crate::controller::annotation::SyncRequest;
use crate::controller::reconciler::types::{Reconciler, SyncOutcome};
use crate::controller::store::{with_deadline, StoreError};
use crate::observability::metrics;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Secret type written for newly created Secrets
const OPAQUE: &str = "Opaque";

/// Build the Secret to write
///
/// An existing Secret keeps its other labels, annotations and type; its data is
/// replaced wholesale. A new Secret is `Opaque`.
#[must_use]
pub fn build_secret(
    existing: Option<Secret>,
    request: &SyncRequest,
    data: BTreeMap<String, String>,
    synced_at: DateTime<Utc>,
) -> Secret {
    let mut secret = existing.unwrap_or_else(|| Secret {
        metadata: ObjectMeta {
            name: Some(request.secret_name.clone()),
            namespace: Some(request.namespace.clone()),
            ..ObjectMeta::default()
        },
        type_: Some(OPAQUE.to_string()),
        ..Secret::default()
    });

    secret
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

    let annotations = secret
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new);
    annotations.insert(
        SOURCE_PATH_ANNOTATION.to_string(),
        request.source_path.clone(),
    );
    annotations.insert(
        SYNCED_AT_ANNOTATION.to_string(),
        synced_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    );

    secret.data = Some(
        data.into_iter()
            .map(|(k, v)| (k, ByteString(v.into_bytes())))
            .collect(),
    );
    secret.string_data = None;

    secret
}

/// Whether a Secret carries the managed-by label of this controller
#[must_use]
pub fn is_managed(secret: &Secret) -> bool {
    secret
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY_LABEL))
        .is_some_and(|value| value == MANAGED_BY_VALUE)
}

/// Create the Secret if it is absent, otherwise replace it
///
/// The Secret is written even when its data is unchanged so that `synced-at`
/// reflects the latest successful sync.
///
/// # Errors
///
/// Returns the [`StoreError`] of the failed read or write.
pub async fn upsert_secret(
    ctx: &Reconciler,
    request: &SyncRequest,
    data: BTreeMap<String, String>,
) -> Result<SyncOutcome, StoreError> {
    let namespace = request.namespace.as_str();
    let name = request.secret_name.as_str();
    let timeout = ctx.config.api_timeout();

    let existing = with_deadline(
        timeout,
        &ctx.shutdown,
        ctx.store.get_secret(namespace, name),
    )
    .await?;

    match existing {
        Some(current) => {
            if !is_managed(&current) {
                warn!(
                    secret.name = name,
                    secret.namespace = namespace,
                    "Adopting existing Secret without managed-by label"
                );
            }
            let secret = build_secret(Some(current), request, data, ctx.now());
            info!(
                secret.name = name,
                secret.namespace = namespace,
                keys = secret.data.as_ref().map_or(0, BTreeMap::len),
                "Updating existing secret"
            );
            with_deadline(
                timeout,
                &ctx.shutdown,
                ctx.store.replace_secret(namespace, name, &secret),
            )
            .await?;
            metrics::increment_secrets_written("update");
            Ok(SyncOutcome::Updated)
        }
        None => {
            let secret = build_secret(None, request, data, ctx.now());
            info!(
                secret.name = name,
                secret.namespace = namespace,
                keys = secret.data.as_ref().map_or(0, BTreeMap::len),
                "Creating new secret"
            );
            with_deadline(
                timeout,
                &ctx.shutdown,
                ctx.store.create_secret(namespace, &secret),
            )
            .await?;
            metrics::increment_secrets_written("create");
            Ok(SyncOutcome::Created)
        }
    }
}
