//! # Pod Secret Controller
//!
//! A Kubernetes controller that watches pods for the secret sync annotation,
//! fetches the referenced secret from an external store (AWS Secrets Manager)
//! and writes it into a Secret in the pod's namespace.
//!
//! ## Features
//!
//! - **Annotation driven**: No CRDs; pods declare what they need
//! - **Self-healing**: Deleted or edited managed Secrets are rewritten
//! - **Key mapping**: Rename or select keys from the external secret
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks
//! - **Leader election**: Optional Lease-based election for multiple replicas

use anyhow::Result;
use pod_secret_controller::runtime::initialization::initialize;
use pod_secret_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.client,
        init.reconciler,
        init.server_state,
        init.controller_config,
        init.shutdown,
    )
    .await
}
