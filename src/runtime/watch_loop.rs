//! # Watch Loop
//!
//! Controller watch loop that monitors Pods and triggers reconciliation when
//! they change. Managed Secrets are watched as a secondary resource and mapped
//! back to the pods that requested them, so a deleted or edited Secret is
//! rewritten. With `LEADER_ELECT=true` the loop first waits for the leader
//! Lease and stops if it is lost.

use crate::config::SharedControllerConfig;
use crate::constants::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
use crate::controller::reconciler::{
    pods_for_secret_in_cache, reconcile_pod, PodKey, Reconciler, ReconcilerError,
};
use crate::controller::server::ServerState;
use crate::observability::metrics;
use crate::runtime::error_policy::{
    handle_missing_pod, handle_reconciliation_error, handle_watch_stream_error,
};
use crate::runtime::leader_election::{LeaderElector, LeaderGuard};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::Api;
use kube::Client;
use kube_runtime::controller::{self, Action};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Run the controller watch loop
///
/// Sets up the Pod controller with the managed Secret watch, handles graceful
/// shutdown, and restarts the controller if its stream ends unexpectedly.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
    shutdown: CancellationToken,
) -> Result<(), anyhow::Error> {
    // Mark not ready and abort in-flight provider calls once a signal arrives
    let shutdown_server_state = Arc::clone(&server_state);
    let shutdown_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.mark_not_ready();
        shutdown_token.cancel();
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let leader = if controller_config.leader_elect {
        let elector = Arc::new(LeaderElector::new(client.clone(), &controller_config));
        let Some(guard) = elector.acquire(&shutdown).await else {
            info!("Shutdown requested before leadership was acquired");
            return Ok(());
        };
        Some(guard)
    } else {
        None
    };
    let leadership_lost = leader
        .as_ref()
        .map_or_else(CancellationToken::new, LeaderGuard::lost);

    let backoff_ms = Arc::new(AtomicU64::new(controller_config.backoff_start_ms));
    let secret_selector = format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}");

    loop {
        if shutdown.is_cancelled() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::span!(
            tracing::Level::INFO,
            "controller.watch",
            operation = "watch_loop"
        );

        info!(
            concurrency = controller_config.max_concurrent_reconciliations,
            "Starting controller watch loop..."
        );

        let pods: Api<Pod> = Api::all(client.clone());
        let secrets: Api<Secret> = Api::all(client.clone());

        let pod_controller = Controller::new(pods, watcher::Config::default());
        let pod_cache = pod_controller.store();

        let backoff_for_stream = Arc::clone(&backoff_ms);
        let config_for_stream = Arc::clone(&controller_config);
        let reconciler_for_stream = Arc::clone(&reconciler);

        let controller_run = pod_controller
            .watches(
                secrets,
                watcher::Config::default().labels(&secret_selector),
                move |secret: Secret| {
                    let pods = pods_for_secret_in_cache(&secret, &pod_cache.state());
                    metrics::increment_reverse_lookups(pods.len() as u64);
                    pods
                },
            )
            .with_config(
                controller::Config::default()
                    .concurrency(controller_config.max_concurrent_reconciliations),
            )
            .shutdown_on_signal()
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .for_each(move |result| {
                let backoff = Arc::clone(&backoff_for_stream);
                let config = Arc::clone(&config_for_stream);
                let ctx = Arc::clone(&reconciler_for_stream);
                async move {
                    match result {
                        Ok((obj, _action)) => {
                            backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                            debug!(
                                pod.name = obj.name.as_str(),
                                pod.namespace = obj.namespace.as_deref().unwrap_or_default(),
                                "watch.event.success"
                            );
                        }
                        Err(controller::Error::ReconcilerFailed(e, obj)) => {
                            // Already logged and requeued by the error policy
                            debug!(pod.name = obj.name.as_str(), error = %e, "watch.event.reconcile_failed");
                        }
                        Err(controller::Error::ObjectNotFound(obj)) => {
                            let mut pod_ref = ObjectRef::<Pod>::new(&obj.name);
                            pod_ref.namespace = obj.namespace.clone();
                            handle_missing_pod(&pod_ref, &ctx);
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                config.backoff_max_ms,
                                config.watch_restart_delay_duration(),
                            )
                            .await;
                        }
                    }
                }
            })
            .instrument(watch_span);

        tokio::select! {
            () = controller_run => {}
            () = leadership_lost.cancelled() => {
                error!("Leader lease lost, stopping so another replica can take over");
                server_state.mark_not_ready();
                shutdown.cancel();
                return Err(anyhow::anyhow!("lost the leader election lease"));
            }
        }

        if shutdown.is_cancelled() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            controller_config.watch_restart_delay_secs
        );
        tokio::time::sleep(controller_config.watch_restart_delay_duration()).await;
    }

    if let Some(guard) = leader {
        guard.release().await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Reconcile function handed to the controller
async fn reconcile(obj: Arc<Pod>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let key = PodKey::from_pod(&obj);
    let outcome = reconcile_pod(&ctx, &key).await?;
    ctx.reset_backoff(&key);
    debug!(
        pod.name = key.name.as_str(),
        pod.namespace = key.namespace.as_str(),
        outcome = outcome.as_str(),
        "watch.event.reconciled"
    );
    Ok(Action::await_change())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
