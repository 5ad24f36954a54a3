//! # Leader Election
//!
//! Optional leader election over a `coordination.k8s.io/v1` Lease so that only
//! one controller replica fetches and writes secrets at a time.
//!
//! Every Lease write carries the `resourceVersion` that was read, so two
//! replicas racing for an expired Lease cannot both win: the loser gets a 409
//! and keeps waiting.

use crate::config::ControllerConfig;
use crate::constants::LEADER_LEASE_NAME;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
    #[error("invalid lease timestamp: {0}")]
    Timestamp(#[from] serde_json::Error),
}

/// Build a `MicroTime` through its RFC 3339 wire form
fn micro_time(at: DateTime<Utc>) -> Result<MicroTime, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(
        at.to_rfc3339_opts(SecondsFormat::Micros, true),
    ))
}

fn instant_of(time: &MicroTime) -> Option<DateTime<Utc>> {
    let serde_json::Value::String(raw) = serde_json::to_value(time).ok()? else {
        return None;
    };
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// What a replica may do with the Lease it just read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseClaim {
    /// No Lease exists yet
    Create,
    /// We hold it; bump `renewTime`
    Renew,
    /// The holder stopped renewing; take it over
    TakeOver { transitions: i32 },
    /// Someone else holds a live Lease
    HeldBy(String),
}

/// Decide how `identity` can claim `lease` at `now`
#[must_use]
pub fn claim_for(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseClaim {
    let Some(lease) = lease else {
        return LeaseClaim::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec
        .and_then(|s| s.holder_identity.as_deref())
        .filter(|h| !h.is_empty());

    if holder == Some(identity) {
        return LeaseClaim::Renew;
    }

    let expired = match (
        spec.and_then(|s| s.renew_time.as_ref()).and_then(instant_of),
        spec.and_then(|s| s.lease_duration_seconds),
    ) {
        (Some(renewed), Some(secs)) => now > renewed + chrono::Duration::seconds(i64::from(secs)),
        _ => true,
    };

    match holder {
        Some(other) if !expired => LeaseClaim::HeldBy(other.to_string()),
        _ => LeaseClaim::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0) + 1,
        },
    }
}

/// Contends for the leader Lease
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("lease_name", &self.lease_name)
            .field("namespace", &self.namespace)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    #[must_use]
    pub fn new(client: Client, config: &ControllerConfig) -> Self {
        Self {
            client,
            lease_name: LEADER_LEASE_NAME.to_string(),
            namespace: config.lease_namespace.clone(),
            identity: config.identity.clone(),
        }
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Wait until this replica holds the Lease
    ///
    /// Returns `None` if `shutdown` fires first. API errors while waiting are
    /// logged and retried.
    pub async fn acquire(self: Arc<Self>, shutdown: &CancellationToken) -> Option<LeaderGuard> {
        info!(
            identity = self.identity.as_str(),
            lease = self.lease_name.as_str(),
            namespace = self.namespace.as_str(),
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = self.identity.as_str(), "Leadership acquired");
                    return Some(self.guard());
                }
                Ok(false) => {}
                Err(e) => warn!(
                    identity = self.identity.as_str(),
                    error = %e,
                    "Failed to acquire lease, retrying"
                ),
            }

            tokio::select! {
                () = shutdown.cancelled() => return None,
                () = tokio::time::sleep(RETRY_INTERVAL) => {}
            }
        }
    }

    fn guard(self: &Arc<Self>) -> LeaderGuard {
        let lost = CancellationToken::new();
        let elector = Arc::clone(self);
        let lost_signal = lost.clone();
        let renewal = tokio::spawn(async move {
            loop {
                tokio::time::sleep(RENEW_INTERVAL).await;
                match elector.try_acquire_or_renew().await {
                    Ok(true) => debug!(identity = elector.identity.as_str(), "Lease renewed"),
                    Ok(false) => {
                        warn!(identity = elector.identity.as_str(), "Lease taken by another replica");
                        break;
                    }
                    Err(e) => {
                        warn!(identity = elector.identity.as_str(), error = %e, "Lease renewal failed");
                        break;
                    }
                }
            }
            lost_signal.cancel();
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal,
            lost,
        }
    }

    /// One compare-and-swap round on the Lease
    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api = self.api();
        let now = Utc::now();

        let existing = api.get_opt(&self.lease_name).await?;
        let claim = claim_for(existing.as_ref(), &self.identity, now);

        let result = match (claim, existing) {
            (LeaseClaim::HeldBy(holder), _) => {
                debug!(holder = holder.as_str(), "Lease held by another replica");
                return Ok(false);
            }
            (LeaseClaim::Create, _) => {
                let lease = self.lease(None, now, 0)?;
                api.create(&PostParams::default(), &lease).await
            }
            (LeaseClaim::Renew, Some(mut lease)) => {
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(micro_time(now)?);
                }
                api.replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
            }
            (LeaseClaim::TakeOver { transitions }, Some(current)) => {
                let version = current
                    .metadata
                    .resource_version
                    .ok_or_else(|| LeaderElectionError::MissingResourceVersion(self.lease_name.clone()))?;
                info!(identity = self.identity.as_str(), transitions, "Taking over expired lease");
                let lease = self.lease(Some(version), now, transitions)?;
                api.replace(&self.lease_name, &PostParams::default(), &lease)
                    .await
            }
            (LeaseClaim::Renew | LeaseClaim::TakeOver { .. }, None) => return Ok(false),
        };

        match result {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn lease(
        &self,
        resource_version: Option<String>,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Result<Lease, serde_json::Error> {
        Ok(Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version,
                ..ObjectMeta::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(
                    i32::try_from(LEASE_DURATION.as_secs()).unwrap_or(i32::MAX),
                ),
                acquire_time: Some(micro_time(now)?),
                renew_time: Some(micro_time(now)?),
                lease_transitions: Some(transitions),
                ..LeaseSpec::default()
            }),
        })
    }

    /// Clear the holder so a standby replica takes over without waiting for expiry
    async fn release(&self) -> Result<(), LeaderElectionError> {
        let api = self.api();
        let Some(mut lease) = api.get_opt(&self.lease_name).await? else {
            return Ok(());
        };
        let Some(spec) = lease.spec.as_mut() else {
            return Ok(());
        };
        if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
            return Ok(());
        }
        spec.holder_identity = None;
        spec.renew_time = None;

        match api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(()),
            // Someone else already moved it on
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Held while this replica is the leader; renews the Lease in the background
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal: JoinHandle<()>,
    lost: CancellationToken,
}

impl std::fmt::Debug for LeaderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderGuard")
            .field("elector", &self.elector)
            .field("lost", &self.lost.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl LeaderGuard {
    /// Cancelled once a renewal fails or another replica owns the Lease
    #[must_use]
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Stop renewing and hand the Lease back
    pub async fn release(self) {
        self.renewal.abort();
        if self.lost.is_cancelled() {
            return;
        }
        match self.elector.release().await {
            Ok(()) => info!(identity = self.elector.identity.as_str(), "Leadership released"),
            Err(e) => warn!(error = %e, "Failed to release lease, standby waits for expiry"),
        }
    }
}
