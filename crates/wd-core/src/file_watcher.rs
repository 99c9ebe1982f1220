use crossbeam_channel::{Receiver, Sender};
use notify::{
    event::{CreateKind, ModifyKind, RenameMode},
    EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Returns `true` for event kinds that mean "a file now exists at this path".
///
/// Editors and atomic writers often create a temp file and rename it into
/// place, so the rename target counts as a creation too.
fn is_creation(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
    )
}

/// Watches one directory (non-recursively) for newly created files.
///
/// Events are buffered in a channel by the `notify` backend thread and
/// drained by the owner on its own schedule with [`drain_created`].
///
/// [`drain_created`]: CreationWatcher::drain_created
pub struct CreationWatcher {
    dir: PathBuf,
    extensions: Vec<String>,
    seen: HashSet<PathBuf>,
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<notify::Event>>,
}

impl CreationWatcher {
    /// Start watching `dir`. Only files whose extension is in `extensions`
    /// are reported; an empty list reports everything.
    pub fn new(dir: impl Into<PathBuf>, extensions: &[&str]) -> Result<Self, notify::Error> {
        let dir = dir.into();
        let (tx, rx): (
            Sender<notify::Result<notify::Event>>,
            Receiver<notify::Result<notify::Event>>,
        ) = crossbeam_channel::unbounded();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            dir,
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            seen: HashSet::new(),
            _watcher: watcher,
            rx,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drain pending events and return each newly created file once.
    pub fn drain_created(&mut self) -> Vec<PathBuf> {
        let mut created = Vec::new();

        while let Ok(result) = self.rx.try_recv() {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "file watcher error");
                    continue;
                }
            };
            if !is_creation(&event.kind) {
                continue;
            }
            for path in event.paths {
                if self.matches_extension(&path) && self.seen.insert(path.clone()) {
                    created.push(path);
                }
            }
        }

        created
    }

    fn matches_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|want| want.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}
