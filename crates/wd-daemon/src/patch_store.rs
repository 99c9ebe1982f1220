//! JSON patch artifacts on disk.
//!
//! Pending patches are `*.json` files in the patch directory. Finished ones
//! (applied, blocked or failed) move to `.completed/<id>.json`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use wd_core::types::Patch;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("patch store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed patch {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("patch id {0:?} cannot be used as a file name")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A patch together with where it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPatch {
    pub patch: Patch,
    pub path: PathBuf,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct PatchStore {
    dir: PathBuf,
    completed: PathBuf,
}

impl PatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let completed = dir.join(".completed");
        Self { dir, completed }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn completed_dir(&self) -> &Path {
        &self.completed
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.completed)
            .await
            .map_err(|source| io_err(&self.completed, source))
    }

    /// The most recently modified pending patch, ignoring anything not newer
    /// than `watermark` (older patches are superseded by a later one that has
    /// already finished).
    pub async fn newest_pending(&self, watermark: Option<SystemTime>) -> Result<Option<StoredPatch>> {
        let Some((path, modified)) = newest_json(&self.dir).await? else {
            return Ok(None);
        };
        if watermark.is_some_and(|w| modified <= w) {
            debug!(path = %path.display(), "pending patch superseded by a newer completed one");
            return Ok(None);
        }
        let patch = read_patch(&path).await?;
        Ok(Some(StoredPatch {
            patch,
            path,
            modified,
        }))
    }

    /// Write a still-pending patch back in place (e.g. after a failed attempt).
    /// The file keeps the modification time it was dequeued with, so a retry
    /// never outranks a patch that arrived later.
    pub async fn save_pending(&self, stored: &StoredPatch) -> Result<()> {
        write_patch(&stored.path, &stored.patch).await?;
        set_modified(&stored.path, stored.modified).await
    }

    /// Move a finished patch to `.completed/<id>.json`.
    pub async fn complete(&self, stored: &StoredPatch) -> Result<PathBuf> {
        self.ensure_dirs().await?;
        let dest = self.completed_path(&stored.patch.id)?;
        write_patch(&dest, &stored.patch).await?;
        match tokio::fs::remove_file(&stored.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(io_err(&stored.path, source)),
        }
        Ok(dest)
    }

    pub fn completed_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.completed.join(format!("{id}.json")))
    }

    pub async fn load_completed(&self, id: &str) -> Result<Option<Patch>> {
        let path = self.completed_path(id)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => read_patch(&path).await.map(Some),
            Ok(false) => Ok(None),
            Err(source) => Err(io_err(&path, source)),
        }
    }

    pub async fn save_completed(&self, patch: &Patch) -> Result<()> {
        let path = self.completed_path(&patch.id)?;
        write_patch(&path, patch).await
    }

    /// The most recently written completed record.
    pub async fn newest_completed(&self) -> Result<Option<Patch>> {
        match newest_json(&self.completed).await? {
            Some((path, _)) => read_patch(&path).await.map(Some),
            None => Ok(None),
        }
    }

    /// Every completed record, for lookups by a non-canonical id.
    pub async fn completed_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let Some(mut entries) = read_dir_if_exists(&self.completed).await? else {
            return Ok(ids);
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_err(&self.completed, source))?
        {
            let path = entry.path();
            if is_patch_file(&path) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_patch_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.'));
    !hidden && path.extension().is_some_and(|e| e == "json")
}

async fn read_dir_if_exists(dir: &Path) -> Result<Option<tokio::fs::ReadDir>> {
    match tokio::fs::read_dir(dir).await {
        Ok(rd) => Ok(Some(rd)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_err(dir, source)),
    }
}

async fn newest_json(dir: &Path) -> Result<Option<(PathBuf, SystemTime)>> {
    let Some(mut entries) = read_dir_if_exists(dir).await? else {
        return Ok(None);
    };
    let mut newest: Option<(PathBuf, SystemTime)> = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| io_err(dir, source))?
    {
        let path = entry.path();
        if !is_patch_file(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().map_err(|source| io_err(&path, source))?;
        // Ties go to the lexically greater name so the choice is stable.
        let newer = newest
            .as_ref()
            .is_none_or(|(p, m)| (modified, &path) > (*m, p));
        if newer {
            newest = Some((path, modified));
        }
    }
    Ok(newest)
}

async fn read_patch(path: &Path) -> Result<Patch> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| io_err(path, source))?;
    serde_json::from_str(&text).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_patch(path: &Path, patch: &Patch) -> Result<()> {
    let json = serde_json::to_vec_pretty(patch).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|source| io_err(&tmp, source))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| io_err(path, source))
}

async fn set_modified(path: &Path, modified: SystemTime) -> Result<()> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|source| io_err(path, source))?
        .into_std()
        .await;
    tokio::task::spawn_blocking(move || file.set_modified(modified))
        .await
        .map_err(|e| io_err(path, std::io::Error::other(e)))?
        .map_err(|source| io_err(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wd_core::types::PatchStatus;

    async fn put(dir: &Path, patch: &Patch) -> PathBuf {
        let path = dir.join(format!("{}.json", patch.id));
        write_patch(&path, patch).await.unwrap();
        path
    }

    #[tokio::test]
    async fn empty_or_missing_dir_has_no_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PatchStore::new(tmp.path().join("missing"));
        assert!(store.newest_pending(None).await.unwrap().is_none());
        assert!(store.newest_completed().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn newest_pending_wins_and_watermark_supersedes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PatchStore::new(tmp.path());
        put(tmp.path(), &Patch::new("old", "GPT", "a")).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        put(tmp.path(), &Patch::new("new", "GPT", "b")).await;

        let newest = store.newest_pending(None).await.unwrap().unwrap();
        assert_eq!(newest.patch.id, "new");

        let mut done = newest.clone();
        done.patch.transition(PatchStatus::Applied).unwrap();
        let dest = store.complete(&done).await.unwrap();
        assert!(dest.ends_with(".completed/new.json"));
        assert!(!done.path.exists());

        // "old" predates the completed patch, so it is never picked up.
        assert!(store
            .newest_pending(Some(newest.modified))
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.load_completed("new").await.unwrap().unwrap().status,
            PatchStatus::Applied
        );
        assert_eq!(store.completed_ids().await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn rewriting_a_pending_patch_keeps_its_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PatchStore::new(tmp.path());
        let path = put(tmp.path(), &Patch::new("retry", "GPT", "a")).await;
        let earlier = SystemTime::now() - std::time::Duration::from_secs(60);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(earlier)
            .unwrap();

        let mut stored = store.newest_pending(None).await.unwrap().unwrap();
        assert_eq!(stored.modified, earlier);
        stored.patch.attempts = 1;
        store.save_pending(&stored).await.unwrap();

        let again = store.newest_pending(None).await.unwrap().unwrap();
        assert_eq!(again.patch.attempts, 1);
        assert_eq!(again.modified, earlier);
    }

    #[tokio::test]
    async fn hidden_and_non_json_files_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "hi").unwrap();
        std::fs::write(tmp.path().join(".draft.json"), "{}").unwrap();
        let store = PatchStore::new(tmp.path());
        assert!(store.newest_pending(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_patch_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bad.json"), "{not json").unwrap();
        let store = PatchStore::new(tmp.path());
        let err = store.newest_pending(None).await.unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn path_like_ids_are_rejected() {
        let store = PatchStore::new("/tmp/p");
        assert!(store.completed_path("../etc").is_err());
        assert!(store.completed_path("a/b").is_err());
        assert!(store.completed_path("patch-v1.0.0_x").is_ok());
    }
}
