//! Cooperative shutdown for `wardend`.
//!
//! One [`ShutdownSignal`] is cloned into the runtime loop, every
//! [`Ticker`](crate::ticker::Ticker) and the status API server. The first
//! `trigger` records why the process is stopping and wakes all of them.
//! Side tasks that have to finish before exit are joined with
//! [`join_within`], which aborts a task that overruns its budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared stop flag carrying the reason of the first trigger.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    reason: Arc<watch::Sender<Option<String>>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            reason: Arc::new(tx),
        }
    }

    /// Start shutting down. Returns `false` if shutdown was already under way;
    /// the first reason is kept.
    pub fn trigger(&self, reason: &str) -> bool {
        let first = self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.to_string());
            true
        });
        if first {
            info!(reason, "shutdown triggered");
        } else {
            debug!(reason, "shutdown already in progress");
        }
        first
    }

    pub fn is_shutting_down(&self) -> bool {
        self.reason.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.borrow().clone()
    }

    /// Resolves once shutdown has been triggered, immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.reason.subscribe();
        // The sender lives in `self`, so this only returns once triggered.
        let _ = rx.wait_for(Option::is_some).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// How a task ended under [`join_within`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joined {
    Finished,
    /// The task panicked or was cancelled elsewhere.
    Failed,
    /// The budget ran out and the task was aborted.
    Aborted,
}

/// Wait up to `budget` for `handle`, aborting it if it is still running.
pub async fn join_within(task: &str, mut handle: JoinHandle<()>, budget: Duration) -> Joined {
    match tokio::time::timeout(budget, &mut handle).await {
        Ok(Ok(())) => {
            debug!(task, "task finished");
            Joined::Finished
        }
        Ok(Err(e)) => {
            warn!(task, error = %e, "task ended abnormally");
            Joined::Failed
        }
        Err(_) => {
            warn!(task, budget_ms = budget.as_millis() as u64, "task overran shutdown budget, aborting");
            handle.abort();
            Joined::Aborted
        }
    }
}
