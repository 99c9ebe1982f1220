//! Patch admission: role verification plus diff and summary consistency.

pub mod diff_monitor;
pub mod role;
pub mod summary_sync;

use std::path::PathBuf;

use ring::digest;
use wd_core::types::Patch;

pub use diff_monitor::{DiffCheck, DiffMonitor};
pub use role::RoleVerifier;
pub use summary_sync::{SummarySync, SummaryVerdict};

use crate::patch_store::StoreError;
use crate::signal_bus::{BLOCKED_DIFF_MISMATCH, BLOCKED_UNAUTHORIZED_ROLE};

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no completed record for {0}")]
    NoCompletedRecord(String),
}

pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Lowercase hex SHA-256.
pub fn sha256_hex(data: &[u8]) -> String {
    digest::digest(&digest::SHA256, data)
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Patch ids compare equal with or without parentheses around the phase.
pub(crate) fn canonical_id(id: &str) -> String {
    id.chars().filter(|c| !matches!(c, '(' | ')')).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted {
        role: String,
        /// The declared content hash was present and matched.
        hash_verified: bool,
    },
    Blocked {
        /// `BLOCKED_*` marker sent as the signal's `patchId`.
        marker: &'static str,
        reason: String,
    },
}

/// The checks run before a patch may execute. Role first: an unauthorized
/// role blocks regardless of anything else.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    roles: RoleVerifier,
}

impl AdmissionGate {
    pub fn new(roles: RoleVerifier) -> Self {
        Self { roles }
    }

    pub fn admit(&self, patch: &Patch) -> Admission {
        let role = match self.roles.verify(patch) {
            Ok(role) => role,
            Err(reason) => {
                return Admission::Blocked {
                    marker: BLOCKED_UNAUTHORIZED_ROLE,
                    reason: format!("unauthorized role: {reason}"),
                }
            }
        };

        let hash_verified = match patch.validation.content_hash.as_deref() {
            None => false,
            Some(declared) => {
                let actual = sha256_hex(patch.content.as_bytes());
                if !declared.trim().eq_ignore_ascii_case(&actual) {
                    return Admission::Blocked {
                        marker: BLOCKED_DIFF_MISMATCH,
                        reason: format!("content hash {actual} does not match declared {declared}"),
                    };
                }
                true
            }
        };
        Admission::Admitted {
            role,
            hash_verified,
        }
    }
}
