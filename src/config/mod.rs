//! # Configuration
//!
//! Controller configuration loaded from environment variables.
//!
//! Configuration is read once at startup and shared read-only between the
//! watch loop, the error policy, and every reconciliation.

mod controller;

use std::sync::Arc;

pub use controller::ControllerConfig;

/// Controller configuration shared across tasks
pub type SharedControllerConfig = Arc<ControllerConfig>;
