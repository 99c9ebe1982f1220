//! Runtime plumbing for the warden event loop.
//!
//! - [`shutdown`]: shutdown flag with its trigger reason, and bounded joins
//!   of side tasks.
//! - [`ticker`]: periodic or manually fired ticks that stop on shutdown, so
//!   tests can drive every loop deterministically.

pub mod shutdown;
pub mod ticker;
