//! Logging setup shared by the warden binaries and tests.
//!
//! Everything in the workspace logs through `tracing` with structured fields;
//! this crate only decides how those events are rendered.

pub mod logging;
