//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use pod_secret_controller::prelude::*;
//! ```

// Annotation types
pub use crate::controller::annotation::{parse_annotation, SyncRequest, ValidationError};

// Provider traits - needed for implementing providers
pub use crate::provider::{
    ExternalSecretData, FetchContext, FetchError, ProviderRegistry, SecretProvider,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile_pod, BackoffState, PodKey, Reconciler, ReconcilerError, SyncOutcome,
};

// Store and event seams
pub use crate::controller::events::EventSink;
pub use crate::controller::store::{ResourceStore, StoreError};

// Config types - for configuration management
pub use crate::config::{ControllerConfig, SharedControllerConfig};
