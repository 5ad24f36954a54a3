//! Pod Secret Controller Library
//!
//! Syncs secrets from external secret stores into Kubernetes Secrets requested
//! by pod annotations.
//!
//! A pod opts in with the `secret-sync.octopilot.io/sync` annotation:
//!
//! ```yaml
//! metadata:
//!   annotations:
//!     secret-sync.octopilot.io/sync: |
//!       provider: aws-secretsmanager
//!       path: /prod/myapp/database
//!       secretName: db-credentials
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use pod_secret_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod prelude;
pub mod provider;
pub mod runtime;
