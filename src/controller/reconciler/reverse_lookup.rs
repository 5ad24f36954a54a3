//! # Reverse Lookup
//!
//! Maps a change to a managed Secret back to the pods that requested it, so a
//! deleted or edited Secret is rewritten from the external source.
//!
//! Each lookup scans the pods of the Secret's namespace and re-parses their
//! annotations.

use crate::constants::SYNC_ANNOTATION;
use crate::controller::annotation::parse_annotation;
use crate::controller::reconciler::upsert::is_managed;
use crate::controller::store::{ResourceStore, StoreError};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

/// Pods among `pods` whose annotation requests `secret`
///
/// Returns nothing for Secrets without the managed-by label. Pods in other
/// namespaces, pods without the annotation and pods whose annotation does not
/// validate are ignored.
pub fn pods_for_secret<'a, I>(secret: &Secret, pods: I) -> Vec<ObjectRef<Pod>>
where
    I: IntoIterator<Item = &'a Pod>,
{
    if !is_managed(secret) {
        return Vec::new();
    }

    let Some(secret_namespace) = secret.namespace() else {
        return Vec::new();
    };
    let secret_name = secret.name_any();

    pods.into_iter()
        .filter(|pod| pod.namespace().as_deref() == Some(secret_namespace.as_str()))
        .filter_map(|pod| {
            let raw = pod.annotations().get(SYNC_ANNOTATION)?;
            let request = parse_annotation(
                raw,
                &secret_namespace,
                &pod.name_any(),
                &pod.uid().unwrap_or_default(),
            )
            .ok()?;
            request.ensure_namespace(&secret_namespace).ok()?;
            (request.secret_name == secret_name).then(|| ObjectRef::from_obj(pod))
        })
        .collect()
}

/// Same as [`pods_for_secret`] for pods held in a reflector store
pub fn pods_for_secret_in_cache(secret: &Secret, pods: &[Arc<Pod>]) -> Vec<ObjectRef<Pod>> {
    let refs = pods_for_secret(secret, pods.iter().map(Arc::as_ref));
    if !refs.is_empty() {
        debug!(
            secret.name = secret.name_any().as_str(),
            pods = refs.len(),
            "Managed secret changed, re-enqueueing pods"
        );
    }
    refs
}

/// List the pods of the Secret's namespace and return those that request it
///
/// # Errors
///
/// Returns the [`StoreError`] of the pod listing.
pub async fn find_pods_for_secret(
    store: &dyn ResourceStore,
    secret: &Secret,
) -> Result<Vec<ObjectRef<Pod>>, StoreError> {
    if !is_managed(secret) {
        return Ok(Vec::new());
    }
    let Some(namespace) = secret.namespace() else {
        return Ok(Vec::new());
    };
    let pods = store.list_pods(&namespace).await?;
    Ok(pods_for_secret(secret, &pods))
}
