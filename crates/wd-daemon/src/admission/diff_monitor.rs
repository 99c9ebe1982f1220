use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, warn};

use super::summary_sync::{extract_content_hash, extract_patch_id};
use super::{canonical_id, sha256_hex, AdmissionError, Result};
use crate::patch_store::PatchStore;
use crate::signal_bus::{Signal, SignalBus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DiffCheck {
    Match { patch_id: String },
    Mismatch {
        patch_id: String,
        expected: String,
        actual: String,
    },
}

/// Compares the newest completed patch's content hash with the hash its
/// summary reports. A mismatch is only reported, never enforced.
#[derive(Debug)]
pub struct DiffMonitor {
    store: PatchStore,
    summary_dir: PathBuf,
    /// Last (patch, summary hash) reported, so an unchanged pair is not
    /// re-signalled every interval.
    last_reported: Option<(String, String)>,
}

impl DiffMonitor {
    pub fn new(store: PatchStore, summary_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            summary_dir: summary_dir.into(),
            last_reported: None,
        }
    }

    /// `None` when there is nothing to compare: no completed patch, no
    /// summary for it, or no hash in the summary.
    pub async fn check(&mut self, signals: &SignalBus) -> Result<Option<DiffCheck>> {
        let Some(mut patch) = self.store.newest_completed().await? else {
            return Ok(None);
        };
        let Some(summary) = newest_summary_for(&self.summary_dir, &patch.id).await? else {
            debug!(patch = %patch.id, "no summary for newest completed patch");
            return Ok(None);
        };
        let Some(expected) = extract_content_hash(&summary) else {
            debug!(patch = %patch.id, "summary carries no content hash");
            return Ok(None);
        };

        let actual = sha256_hex(patch.content.as_bytes());
        let key = (patch.id.clone(), expected.clone());
        let fresh = self.last_reported.as_ref() != Some(&key);
        self.last_reported = Some(key);

        if actual == expected {
            if !patch.validation.diff_verified {
                patch.validation.diff_verified = true;
                self.store.save_completed(&patch).await?;
            }
            return Ok(Some(DiffCheck::Match { patch_id: patch.id }));
        }

        if fresh {
            warn!(patch = %patch.id, %expected, %actual, "completed patch differs from its summary");
            signals.emit(Signal::DiffMismatch {
                patch_id: patch.id.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
        Ok(Some(DiffCheck::Mismatch {
            patch_id: patch.id,
            expected,
            actual,
        }))
    }
}

/// Text of the newest summary file naming `patch_id`.
async fn newest_summary_for(dir: &Path, patch_id: &str) -> Result<Option<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(AdmissionError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let wanted = canonical_id(patch_id);
    let mut best: Option<(SystemTime, String)> = None;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(source) => {
                return Err(AdmissionError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let Ok(text) = tokio::fs::read_to_string(entry.path()).await else {
            continue;
        };
        let names_patch = extract_patch_id(&text).is_some_and(|id| canonical_id(id) == wanted);
        if !names_patch {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().is_none_or(|(m, _)| modified > *m) {
            best = Some((modified, text));
        }
    }
    Ok(best.map(|(_, text)| text))
}
