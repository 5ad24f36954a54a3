//! # Reconciler
//!
//! Core reconciliation logic for pods requesting a synced Secret.
//!
//! The reconciler:
//! - Reads the secret sync annotation of a pod
//! - Fetches the referenced secret from the external provider
//! - Writes it into a Secret in the pod's namespace
//! - Records the result as events on the pod
//!
//! ## Reconciliation Flow
//!
//! 1. Load the pod (gone → done)
//! 2. Extract the annotation (absent → done)
//! 3. Parse and validate it, then check the namespace (invalid → `AnnotationInvalid`)
//! 4. Resolve the provider (unknown → `ProviderUnsupported`)
//! 5. Fetch (failure → `SecretFetchFailed`, retried if transient)
//! 6. Merge keys and create or replace the Secret (failure → `SecretSyncFailed`)
//! 7. Emit `SecretSyncSuccess`

pub mod merge;
pub mod reconcile;
pub mod reverse_lookup;
pub mod types;
pub mod upsert;

pub use merge::merge_payload;
pub use reconcile::reconcile_pod;
pub use reverse_lookup::{find_pods_for_secret, pods_for_secret, pods_for_secret_in_cache};
pub use types::{BackoffState, Clock, PodKey, Reconciler, ReconcilerError, SyncOutcome};
pub use upsert::{build_secret, is_managed};
