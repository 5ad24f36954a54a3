//! # Reconcile
//!
//! One pass of the sync state machine for a single pod:
//! load, extract, validate, namespace check, resolve provider, fetch, merge,
//! upsert, notify.
//!
//! Permanent failures are recorded as events and end the pass with a
//! [`SyncOutcome`]; the pod is not looked at again until it changes.
//! Transient failures are returned as [`ReconcilerError`] so the error policy
//! requeues the pod with backoff.

use crate::constants::SYNC_ANNOTATION;
use crate::controller::annotation::parse_annotation;
use crate::controller::events::{actions, reasons};
use crate::controller::reconciler::merge::merge_payload;
use crate::controller::reconciler::types::{PodKey, Reconciler, ReconcilerError, SyncOutcome};
use crate::controller::reconciler::upsert::upsert_secret;
use crate::controller::store::{with_deadline, StoreError};
use crate::observability::metrics;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Reconcile the pod identified by `key`
///
/// # Errors
///
/// Returns [`ReconcilerError`] only for failures worth retrying: the pod could
/// not be read, the provider failed transiently, or the Secret write failed
/// with anything other than `Forbidden` or `Invalid`.
pub async fn reconcile_pod(
    ctx: &Reconciler,
    key: &PodKey,
) -> Result<SyncOutcome, ReconcilerError> {
    let span = info_span!(
        "pod.reconcile",
        pod.name = key.name.as_str(),
        pod.namespace = key.namespace.as_str()
    );
    let start = Instant::now();

    let result = run(ctx, key).instrument(span).await;

    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    match &result {
        Ok(outcome) => metrics::increment_reconciliations(outcome.as_str()),
        Err(_) => metrics::increment_reconciliation_errors(),
    }
    result
}

async fn run(ctx: &Reconciler, key: &PodKey) -> Result<SyncOutcome, ReconcilerError> {
    // Load
    let pod = with_deadline(
        ctx.config.api_timeout(),
        &ctx.shutdown,
        ctx.store.get_pod(&key.namespace, &key.name),
    )
    .await
    .map_err(|source| ReconcilerError::PodLoad {
        key: key.clone(),
        source,
    })?;
    let Some(pod) = pod else {
        debug!("Pod no longer exists, nothing to do");
        return Ok(SyncOutcome::PodGone);
    };

    // Extract
    let Some(raw) = pod.annotations().get(SYNC_ANNOTATION) else {
        debug!("Pod has no secret sync annotation, skipping");
        return Ok(SyncOutcome::NoAnnotation);
    };

    info!("Reconciling pod");
    let pod_ref = pod.object_ref(&());
    let pod_namespace = pod.namespace().unwrap_or_default();
    let pod_uid = pod.uid().unwrap_or_default();

    // Validate
    let request = match parse_annotation(raw, &pod_namespace, &pod.name_any(), &pod_uid) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Invalid secret sync annotation");
            emit(
                ctx,
                &pod_ref,
                EventType::Warning,
                reasons::ANNOTATION_INVALID,
                format!("Invalid secret sync annotation: {e}"),
            )
            .await;
            return Ok(SyncOutcome::InvalidAnnotation);
        }
    };

    // Namespace check
    if let Err(e) = request.ensure_namespace(&pod_namespace) {
        warn!(error = %e, "Namespace validation failed");
        emit(
            ctx,
            &pod_ref,
            EventType::Warning,
            reasons::ANNOTATION_INVALID,
            format!("Invalid secret sync annotation: {e}"),
        )
        .await;
        return Ok(SyncOutcome::InvalidAnnotation);
    }

    // Provider resolve
    let Some(provider) = ctx.registry.get(&request.provider) else {
        warn!(
            provider = request.provider.as_str(),
            available = ?ctx.registry.list(),
            "Provider not found"
        );
        emit(
            ctx,
            &pod_ref,
            EventType::Warning,
            reasons::PROVIDER_UNSUPPORTED,
            format!("Provider '{}' not found in registry", request.provider),
        )
        .await;
        return Ok(SyncOutcome::ProviderUnsupported);
    };

    // Fetch
    info!(
        provider = request.provider.as_str(),
        path = request.source_path.as_str(),
        "Fetching secret from provider"
    );
    let fetched = match provider
        .fetch(&ctx.fetch_context(), &request.source_path)
        .await
    {
        Ok(data) => data,
        Err(e) => {
            warn!(
                provider = request.provider.as_str(),
                path = request.source_path.as_str(),
                error = %e,
                transient = e.is_transient(),
                "Failed to fetch secret"
            );
            emit(
                ctx,
                &pod_ref,
                EventType::Warning,
                reasons::SECRET_FETCH_FAILED,
                format!(
                    "Failed to fetch secret from {} (path: {}): {e}",
                    request.provider, request.source_path
                ),
            )
            .await;
            if e.is_transient() {
                return Err(ReconcilerError::TransientFetch {
                    provider: request.provider.clone(),
                    path: request.source_path.clone(),
                    source: e,
                });
            }
            return Ok(SyncOutcome::FetchFailed);
        }
    };

    // Merge
    let data = merge_payload(&fetched, request.key_mapping.as_ref());

    // Upsert
    let outcome = match upsert_secret(ctx, &request, data).await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics::increment_secret_write_failures(e.kind());
            let note = format!(
                "Failed to write secret '{}': {e}",
                request.secret_name
            );
            if e.is_transient() {
                warn!(
                    secret.name = request.secret_name.as_str(),
                    error = %e,
                    "Failed to write secret, will retry"
                );
                emit(ctx, &pod_ref, EventType::Warning, reasons::SECRET_SYNC_FAILED, note).await;
                return Err(ReconcilerError::SecretWrite {
                    namespace: request.namespace.clone(),
                    name: request.secret_name.clone(),
                    source: e,
                });
            }
            match &e {
                StoreError::Forbidden { .. } => error!(
                    secret.name = request.secret_name.as_str(),
                    error = %e,
                    "Secret write rejected, check the controller's RBAC for secrets"
                ),
                _ => error!(
                    secret.name = request.secret_name.as_str(),
                    error = %e,
                    "Secret rejected by the API server, not retrying until the pod changes"
                ),
            }
            emit(ctx, &pod_ref, EventType::Warning, reasons::SECRET_SYNC_FAILED, note).await;
            return Ok(SyncOutcome::WriteRejected);
        }
    };

    // Notify
    info!(
        secret.name = request.secret_name.as_str(),
        provider = request.provider.as_str(),
        outcome = outcome.as_str(),
        "Secret synchronized"
    );
    emit(
        ctx,
        &pod_ref,
        EventType::Normal,
        reasons::SECRET_SYNC_SUCCESS,
        format!(
            "Successfully synchronized secret '{}' from {} (path: {})",
            request.secret_name, request.provider, request.source_path
        ),
    )
    .await;

    Ok(outcome)
}

async fn emit(
    ctx: &Reconciler,
    pod_ref: &ObjectReference,
    type_: EventType,
    reason: &str,
    note: String,
) {
    ctx.events
        .publish(pod_ref, type_, reason, actions::RECONCILE, Some(note))
        .await;
}

