//! Fire-and-forget lifecycle and patch notifications.
//!
//! Every [`Signal`] is fanned out to in-process flume subscribers and, when
//! enabled, POSTed as JSON to the configured relay endpoint. Delivery
//! failures are logged and dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wd_core::config::SignalsConfig;
use wd_core::types::PatchStatus;

/// Marker used as `patchId` when a patch is blocked by the role verifier.
pub const BLOCKED_UNAUTHORIZED_ROLE: &str = "BLOCKED_UNAUTHORIZED_ROLE";
/// Marker used as `patchId` when a declared content hash does not match.
pub const BLOCKED_DIFF_MISMATCH: &str = "BLOCKED_DIFF_MISMATCH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Signal {
    DaemonStarted {
        daemon: String,
        pid: Option<u32>,
    },
    DaemonStopped {
        daemon: String,
    },
    DaemonFailed {
        daemon: String,
        error: String,
        restart_count: u32,
    },
    DaemonExhausted {
        daemon: String,
        restart_count: u32,
    },
    DaemonRestarted {
        daemon: String,
        attempt: u32,
        source: String,
    },
    PatchComplete {
        /// The patch id, or a `BLOCKED_*` marker for rejected patches.
        patch_id: String,
        source_patch: String,
        status: PatchStatus,
        reason: Option<String>,
    },
    DiffMismatch {
        patch_id: String,
        expected: String,
        actual: String,
    },
    SummarySync {
        patch_id: String,
        passed: bool,
        summary: String,
    },
    CoordinatorError {
        error: String,
        consecutive_errors: u32,
    },
}

impl Signal {
    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::DaemonStarted { .. } => "daemon-started",
            Signal::DaemonStopped { .. } => "daemon-stopped",
            Signal::DaemonFailed { .. } => "daemon-failed",
            Signal::DaemonExhausted { .. } => "daemon-exhausted",
            Signal::DaemonRestarted { .. } => "daemon-restarted",
            Signal::PatchComplete { .. } => "patch-complete",
            Signal::DiffMismatch { .. } => "diff-mismatch",
            Signal::SummarySync { .. } => "summary-sync",
            Signal::CoordinatorError { .. } => "coordinator-error",
        }
    }
}

/// What actually goes over the wire: the signal plus an emission timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct SignalEnvelope<'a> {
    #[serde(flatten)]
    pub signal: &'a Signal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("signal bus has no HTTP endpoint configured")]
    Disabled,
    #[error("signal delivery failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone)]
struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

/// Cloneable handle; all clones share the subscriber list.
#[derive(Clone)]
pub struct SignalBus {
    http: Option<HttpSink>,
    subscribers: Arc<Mutex<Vec<flume::Sender<Signal>>>>,
}

impl SignalBus {
    pub fn new(config: &SignalsConfig) -> Self {
        if !config.enabled {
            return Self::local();
        }
        let http = match build_client(config.timeout()) {
            Ok(client) => Some(HttpSink {
                client,
                endpoint: config.endpoint.clone(),
            }),
            Err(e) => {
                warn!(error = %e, "failed to build signal HTTP client, signals stay in-process");
                None
            }
        };
        Self {
            http,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A bus with in-process subscribers only.
    pub fn local() -> Self {
        Self {
            http: None,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<Signal> {
        let (tx, rx) = flume::unbounded();
        self.lock_subscribers().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    /// Publish to subscribers and, if configured, POST in the background.
    pub fn emit(&self, signal: Signal) {
        debug!(kind = signal.kind(), "signal emitted");
        self.lock_subscribers()
            .retain(|tx| tx.send(signal.clone()).is_ok());

        if self.http.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(kind = signal.kind(), "no runtime, skipping HTTP delivery");
            return;
        };
        let bus = self.clone();
        handle.spawn(async move {
            if let Err(e) = bus.post(&signal).await {
                warn!(kind = signal.kind(), error = %e, "signal delivery failed");
            }
        });
    }

    /// POST one signal and wait for the response.
    pub async fn post(&self, signal: &Signal) -> Result<(), SignalError> {
        let sink = self.http.as_ref().ok_or(SignalError::Disabled)?;
        let envelope = SignalEnvelope {
            signal,
            timestamp: Utc::now(),
        };
        sink.client
            .post(&sink.endpoint)
            .json(&envelope)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<flume::Sender<Signal>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::local()
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
}
