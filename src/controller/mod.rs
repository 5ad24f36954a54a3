//! # Controller
//!
//! Core controller modules for the pod secret controller.
//!
//! - `annotation`: Parsing and validation of the secret sync annotation
//! - `backoff`: Exponential backoff for retries
//! - `events`: Kubernetes events recorded on pods
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks
//! - `store`: Pod and Secret access

pub mod annotation;
pub mod backoff;
pub mod events;
pub mod reconciler;
pub mod server;
pub mod store;
