//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//!
//! Logging is plain `tracing` with structured fields; the subscriber is set up in
//! [`crate::runtime::initialization`].

pub mod metrics;
