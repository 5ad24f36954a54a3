//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Name the controller reports itself as (events, managed-by label)
pub const CONTROLLER_NAME: &str = "pod-secret-controller";

/// Pod annotation carrying the secret sync request
pub const SYNC_ANNOTATION: &str = "secret-sync.octopilot.io/sync";

/// Label marking a Secret as written by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label
pub const MANAGED_BY_VALUE: &str = CONTROLLER_NAME;

/// Secret annotation recording the external source path
pub const SOURCE_PATH_ANNOTATION: &str = "secret-sync.octopilot.io/source-path";

/// Secret annotation recording the last successful sync (RFC3339, UTC)
pub const SYNCED_AT_ANNOTATION: &str = "secret-sync.octopilot.io/synced-at";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Default deadline for a single provider fetch (seconds)
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default deadline for a single Kubernetes API call (seconds)
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Default limit on reconciliations running at the same time
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Lease used for leader election between controller replicas
pub const LEADER_LEASE_NAME: &str = "pod-secret-controller-leader";

/// Namespace holding the leader Lease when `POD_NAMESPACE` is unset
pub const DEFAULT_LEASE_NAMESPACE: &str = "default";
