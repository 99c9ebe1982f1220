use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use super::{canonical_id, AdmissionError, Result};
use crate::patch_store::PatchStore;
use crate::signal_bus::{Signal, SignalBus};

/// `patch-vMAJOR.MINOR.PATCH` with an optional `(P<n>)` or `P<n>` phase and
/// an `_slug` suffix.
static PATCH_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"patch-v\d+\.\d+\.\d+(?:\(P\d+\)|P\d+)?_[A-Za-z0-9][A-Za-z0-9_-]*")
        .expect("patch id regex is valid")
});

static CONTENT_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)sha256\s*[:=]\s*([0-9a-f]{64})")
        .expect("content hash regex is valid")
});

pub fn extract_patch_id(text: &str) -> Option<&str> {
    PATCH_ID.find(text).map(|m| m.as_str())
}

/// A `sha256: <hex>` marker, lowercased.
pub fn extract_content_hash(text: &str) -> Option<String> {
    CONTENT_HASH
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

pub fn is_pass(text: &str) -> bool {
    text.contains('✅') || text.contains("PASS")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryVerdict {
    pub patch_id: String,
    pub passed: bool,
    pub summary: String,
}

/// Records summary verdicts on the matching completed-patch records.
#[derive(Debug, Clone)]
pub struct SummarySync {
    store: PatchStore,
}

impl SummarySync {
    pub fn new(store: PatchStore) -> Self {
        Self { store }
    }

    /// Classify one summary file and write the verdict to its completed
    /// record. Returns `None` when the file names no patch.
    pub async fn sync_file(&self, path: &Path, signals: &SignalBus) -> Result<Option<SummaryVerdict>> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AdmissionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let summary = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let Some(embedded) = extract_patch_id(&text) else {
            debug!(summary = %summary, "summary names no patch");
            return Ok(None);
        };
        let Some(mut patch) = self.find_completed(embedded).await? else {
            return Err(AdmissionError::NoCompletedRecord(embedded.to_string()));
        };

        let passed = is_pass(&text);
        patch.validation.summary_passed = Some(passed);
        self.store.save_completed(&patch).await?;

        info!(patch = %patch.id, passed, summary = %summary, "summary synced");
        signals.emit(Signal::SummarySync {
            patch_id: patch.id.clone(),
            passed,
            summary: summary.clone(),
        });
        Ok(Some(SummaryVerdict {
            patch_id: patch.id,
            passed,
            summary,
        }))
    }

    /// Exact id first, then any record whose id matches once the phase
    /// parentheses are dropped.
    pub async fn find_completed(&self, id: &str) -> Result<Option<wd_core::types::Patch>> {
        if let Ok(Some(patch)) = self.store.load_completed(id).await {
            return Ok(Some(patch));
        }
        let wanted = canonical_id(id);
        for candidate in self.store.completed_ids().await? {
            if canonical_id(&candidate) == wanted {
                return Ok(self.store.load_completed(&candidate).await?);
            }
        }
        Ok(None)
    }
}
