//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{PodKey, Reconciler, ReconcilerError};
use crate::observability;
use k8s_openapi::api::core::v1::Pod;
use kube_runtime::controller::Action;
use kube_runtime::reflector::ObjectRef;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Handle reconciliation errors with exponential backoff
///
/// Backoff state is tracked per pod so one failing pod does not delay retries
/// of another. It is reset by the watch loop after a successful reconcile.
pub fn handle_reconciliation_error(
    obj: Arc<Pod>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let key = PodKey::from_pod(&obj);

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        pod.name = key.name.as_str(),
        pod.namespace = key.namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    let (delay, error_count) = ctx.next_backoff(&key);
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    warn!(
        reason = error.reason(),
        error_count,
        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        next_retry = next_trigger_time.to_rfc3339().as_str(),
        "Reconciliation failed, retrying with backoff"
    );

    observability::metrics::increment_requeues_total(error.reason());
    Action::requeue(delay)
}

/// Drop the retry state of a pod the controller can no longer find
///
/// A pod deleted while failing never reconciles successfully, so its backoff
/// entry would otherwise stay behind.
pub fn handle_missing_pod(obj: &ObjectRef<Pod>, ctx: &Reconciler) {
    let key = PodKey::from(obj);
    debug!(
        pod.name = key.name.as_str(),
        pod.namespace = key.namespace.as_str(),
        "watch.event.object_gone"
    );
    ctx.reset_backoff(&key);
}

/// Watch stream error classes that need different handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 403: the controller lacks list/watch on pods or secrets
    Forbidden,
    /// 410: resource version expired, normal during restarts
    Expired,
    /// 429: API server storage reinitializing
    TooManyRequests,
    Other,
}

/// Classify a watch error from its debug representation
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("403") || error_string.contains("Forbidden") {
        WatchErrorKind::Forbidden
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::TooManyRequests
    } else {
        WatchErrorKind::Other
    }
}

/// Handle a watch stream error, sleeping where a restart should be delayed
///
/// kube-runtime's watcher recovers from these on its own, so errors are
/// logged and dropped from the stream rather than ending it.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff_ms: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized | WatchErrorKind::Forbidden => {
            error!(
                "Watch not permitted - verify the controller's ClusterRole grants get/list/watch on pods and secrets"
            );
            warn!(
                "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
        }
        WatchErrorKind::Expired => {
            info!("Watch resource version expired (410), watch will restart");
        }
        WatchErrorKind::TooManyRequests => {
            let current_backoff = backoff_ms.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = current_backoff.saturating_mul(2).min(max_backoff_ms);
            backoff_ms.store(new_backoff, Ordering::Relaxed);
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_errors() {
        assert_eq!(
            classify_watch_error("Api(ErrorResponse { code: 401, .. })"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("Api(ErrorResponse { reason: \"Forbidden\", code: 403 })"),
            WatchErrorKind::Forbidden
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123 (456)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorKind::TooManyRequests
        );
        assert_eq!(
            classify_watch_error("connection reset by peer"),
            WatchErrorKind::Other
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_many_requests_doubles_backoff_up_to_max() {
        let backoff = AtomicU64::new(1000);
        handle_watch_stream_error("429 TooManyRequests", &backoff, 3000, Duration::from_secs(5))
            .await;
        assert_eq!(backoff.load(Ordering::Relaxed), 2000);

        handle_watch_stream_error("429 TooManyRequests", &backoff, 3000, Duration::from_secs(5))
            .await;
        assert_eq!(backoff.load(Ordering::Relaxed), 3000);
    }
}
