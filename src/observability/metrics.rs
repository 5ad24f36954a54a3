//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `pod_secret_reconciliations_total{outcome}` - Reconciliations by terminal outcome
//! - `pod_secret_reconciliation_errors_total` - Reconciliations that ended in a retryable error
//! - `pod_secret_reconciliation_duration_seconds` - Duration of reconciliations
//! - `pod_secret_provider_fetches_total{provider,result}` - Provider fetches by result
//! - `pod_secret_provider_fetch_duration_seconds{provider}` - Duration of provider fetches
//! - `pod_secret_secrets_written_total{operation}` - Secrets created or updated
//! - `pod_secret_secret_write_failures_total{kind}` - Failed Secret reads or writes by error kind
//! - `pod_secret_events_published_total{reason}` - Kubernetes events emitted
//! - `pod_secret_requeues_total{reason}` - Requeues scheduled by the error policy
//! - `pod_secret_reverse_lookups_total` - Pods re-enqueued because a managed Secret changed
//!
//! Recording functions work whether or not [`register_metrics`] has been
//! called; unregistered metrics are simply not exported.

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pod_secret_reconciliations_total",
            "Total number of reconciliations by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pod_secret_reconciliation_errors_total",
        "Total number of reconciliations that failed with a retryable error",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "pod_secret_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static PROVIDER_FETCHES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pod_secret_provider_fetches_total",
            "Total number of provider fetches by provider and result",
        ),
        &["provider", "result"],
    )
    .expect("Failed to create PROVIDER_FETCHES_TOTAL metric - this should never happen")
});

static PROVIDER_FETCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "pod_secret_provider_fetch_duration_seconds",
            "Duration of provider fetches in seconds by provider",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["provider"],
    )
    .expect("Failed to create PROVIDER_FETCH_DURATION metric - this should never happen")
});

static SECRETS_WRITTEN_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pod_secret_secrets_written_total",
            "Total number of managed Secrets written by operation (create, update)",
        ),
        &["operation"],
    )
    .expect("Failed to create SECRETS_WRITTEN_TOTAL metric - this should never happen")
});

static SECRET_WRITE_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pod_secret_secret_write_failures_total",
            "Total number of failed Secret upserts by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create SECRET_WRITE_FAILURES_TOTAL metric - this should never happen")
});

static EVENTS_PUBLISHED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pod_secret_events_published_total",
            "Total number of Kubernetes events emitted by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create EVENTS_PUBLISHED_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pod_secret_requeues_total",
            "Total number of requeues scheduled by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static REVERSE_LOOKUPS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pod_secret_reverse_lookups_total",
        "Total number of pods re-enqueued because their managed Secret changed",
    )
    .expect("Failed to create REVERSE_LOOKUPS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_FETCHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_FETCH_DURATION.clone()))?;
    REGISTRY.register(Box::new(SECRETS_WRITTEN_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_WRITE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVENTS_PUBLISHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REVERSE_LOOKUPS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_reconciliations(outcome: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn record_provider_fetch(provider: &str, result: &str, duration: f64) {
    PROVIDER_FETCHES_TOTAL
        .with_label_values(&[provider, result])
        .inc();
    PROVIDER_FETCH_DURATION
        .with_label_values(&[provider])
        .observe(duration);
}

pub fn increment_secrets_written(operation: &str) {
    SECRETS_WRITTEN_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_secret_write_failures(kind: &str) {
    SECRET_WRITE_FAILURES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_events_published(reason: &str) {
    EVENTS_PUBLISHED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_reverse_lookups(count: u64) {
    REVERSE_LOOKUPS_TOTAL.inc_by(count);
}

/// Gather all registered metric families
pub(crate) fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_registration_does_not_panic() {
        increment_reconciliations("created");
        increment_reconciliation_errors();
        observe_reconciliation_duration(0.25);
        record_provider_fetch("aws-secretsmanager", "success", 0.1);
        increment_secrets_written("update");
        increment_secret_write_failures("invalid");
        increment_events_published("SecretSyncSuccess");
        increment_requeues_total("transient-error");
        increment_reverse_lookups(2);

        assert!(
            RECONCILIATIONS_TOTAL
                .with_label_values(&["created"])
                .get()
                >= 1
        );
        assert!(
            SECRET_WRITE_FAILURES_TOTAL
                .with_label_values(&["invalid"])
                .get()
                >= 1
        );
    }
}
