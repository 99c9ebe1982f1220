//! Shared domain types, configuration, and persistence primitives for the
//! warden daemon orchestrator.

pub mod config;
pub mod file_watcher;
pub mod status_log;
pub mod types;
