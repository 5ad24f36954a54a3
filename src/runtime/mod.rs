//! # Runtime
//!
//! Startup, watch loop and error policy of the controller process.

pub mod error_policy;
pub mod initialization;
pub mod leader_election;
pub mod watch_loop;
