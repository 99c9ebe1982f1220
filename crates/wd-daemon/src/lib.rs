//! warden: a single-host daemon lifecycle orchestrator.
//!
//! - Governor: dependency-ordered start/stop/restart of managed daemons
//! - Sentinel and watchdog: liveness sampling and restart requests
//! - Coordinator: health-gated, one-at-a-time patch execution
//! - Admission: role, diff and summary checks on patches
//! - Signal bus: lifecycle and patch events for external consumers

pub mod admission;
pub mod coordinator;
pub mod governor;
pub mod health_log;
pub mod inspector;
pub mod invoker;
pub mod launcher;
pub mod patch_store;
pub mod restart_policy;
pub mod runtime;
pub mod sentinel;
pub mod signal_bus;
pub mod status_api;
pub mod topology;
pub mod watchdog;
