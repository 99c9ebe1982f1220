//! Read-only liveness oracle over the OS process table.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use wd_core::types::DaemonSpec;

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("process table read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("process table query timed out after {0:?}")]
    Timeout(Duration),
    #[error("ps exited with {0}")]
    Command(String),
    #[error("inspector task failed: {0}")]
    Join(String),
}

/// Result of one liveness query. A failed query is reported as not alive
/// with the error attached; it never surfaces as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Liveness {
    pub alive: bool,
    pub pid: Option<u32>,
    pub error: Option<String>,
}

impl Liveness {
    pub fn alive(pid: u32) -> Self {
        Self {
            alive: true,
            pid: Some(pid),
            error: None,
        }
    }

    pub fn dead() -> Self {
        Self {
            alive: false,
            pid: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            alive: false,
            pid: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait ProcessInspector: Send + Sync {
    async fn is_alive(&self, spec: &DaemonSpec) -> Liveness;
}

// ---------------------------------------------------------------------------
// ProcTableInspector
// ---------------------------------------------------------------------------

/// Scans `/proc/*/cmdline` for the daemon's match pattern, falling back to
/// `ps -eo pid=,args=` where `/proc` is not mounted.
#[derive(Debug, Clone)]
pub struct ProcTableInspector {
    timeout: Duration,
    proc_root: std::path::PathBuf,
}

impl ProcTableInspector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            proc_root: "/proc".into(),
        }
    }

    /// Point the scan at a different proc root (used by tests).
    pub fn with_proc_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    async fn query(&self, pattern: &str) -> Result<Option<u32>, InspectError> {
        let fut = async {
            if self.proc_root.is_dir() {
                let root = self.proc_root.clone();
                let pattern = pattern.to_string();
                tokio::task::spawn_blocking(move || scan_proc(&root, &pattern))
                    .await
                    .map_err(|e| InspectError::Join(e.to_string()))?
            } else {
                scan_ps(pattern).await
            }
        };
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| InspectError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl ProcessInspector for ProcTableInspector {
    async fn is_alive(&self, spec: &DaemonSpec) -> Liveness {
        match self.query(spec.match_pattern()).await {
            Ok(Some(pid)) => Liveness::alive(pid),
            Ok(None) => Liveness::dead(),
            Err(e) => {
                warn!(daemon = %spec.name, error = %e, "liveness query failed, treating as not alive");
                Liveness::failed(e.to_string())
            }
        }
    }
}

fn scan_proc(root: &Path, pattern: &str) -> Result<Option<u32>, InspectError> {
    let own_pid = std::process::id();
    for entry in std::fs::read_dir(root)? {
        let Ok(entry) = entry else { continue };
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        // Processes can vanish between readdir and read; skip them.
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        if cmdline_matches(&raw, pattern) {
            debug!(pid, pattern, "process matched");
            return Ok(Some(pid));
        }
    }
    Ok(None)
}

async fn scan_ps(pattern: &str) -> Result<Option<u32>, InspectError> {
    let output = tokio::process::Command::new("ps")
        .args(["-eo", "pid=,args="])
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        return Err(InspectError::Command(output.status.to_string()));
    }
    let own_pid = std::process::id();
    let text = String::from_utf8_lossy(&output.stdout);
    let pid = parse_ps(&text, pattern).find(|pid| *pid != own_pid);
    Ok(pid)
}

fn parse_ps<'a>(text: &'a str, pattern: &'a str) -> impl Iterator<Item = u32> + 'a {
    text.lines().filter_map(move |line| {
        let mut fields = line.split_whitespace();
        let pid: u32 = fields.next()?.parse().ok()?;
        let args: Vec<&str> = fields.collect();
        args_match(&args, pattern).then_some(pid)
    })
}

/// `/proc/<pid>/cmdline` separates arguments with NUL; zombies have an empty one.
fn cmdline_matches(raw: &[u8], pattern: &str) -> bool {
    let text = String::from_utf8_lossy(raw);
    let args: Vec<&str> = text.split('\0').flat_map(str::split_whitespace).collect();
    args_match(&args, pattern)
}

/// The pattern's words must appear as consecutive arguments. A word without
/// a `/` also matches an argument's file name, so `relay` matches
/// `/usr/bin/relay` but not `relay-proxy`.
fn args_match(args: &[&str], pattern: &str) -> bool {
    let words: Vec<&str> = pattern.split_whitespace().collect();
    if words.is_empty() || args.len() < words.len() {
        return false;
    }
    args.windows(words.len())
        .any(|window| window.iter().zip(&words).all(|(arg, word)| arg_matches(arg, word)))
}

fn arg_matches(arg: &str, word: &str) -> bool {
    arg == word || (!word.contains('/') && arg.rsplit('/').next() == Some(word))
}
