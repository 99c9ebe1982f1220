//! Health-gated patch execution.
//!
//! The coordinator is the single writer of [`CoordinationState`]. Each tick
//! either reports why patch work is blocked or dequeues the newest pending
//! patch, admits it, and hands it to a spawned execution task. The task's
//! result comes back over a channel and is applied by [`Coordinator::finish`],
//! so at most one patch is ever in flight.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use wd_core::config::CoordinatorConfig;
use wd_core::status_log::StatusLog;
use wd_core::types::{
    BlockReason, CoordinationState, CoordinatorPhase, HealthView, PatchStatus, PatchTransitionError,
};

use crate::admission::{Admission, AdmissionGate};
use crate::invoker::PatchInvoker;
use crate::patch_store::{PatchStore, StoreError, StoredPatch};
use crate::signal_bus::{Signal, SignalBus};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] PatchTransitionError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub quorum: usize,
    pub max_consecutive_errors: u32,
    pub exec_timeout: Duration,
    pub max_patch_attempts: u32,
}

impl CoordinatorSettings {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            quorum: config.quorum,
            max_consecutive_errors: config.max_consecutive_errors,
            exec_timeout: config.exec_timeout(),
            max_patch_attempts: config.max_patch_attempts,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing pending.
    Idle,
    Blocked(BlockReason),
    /// Execution of this patch id was started.
    Dispatched(String),
    /// The admission gate blocked the patch; it is terminal now.
    Rejected { patch_id: String, marker: &'static str },
    /// The tick's own work failed; counted as a consecutive error.
    Error(String),
}

/// Result of one execution task.
#[derive(Debug)]
pub struct Completion {
    pub stored: StoredPatch,
    pub result: std::result::Result<String, String>,
}

pub struct Coordinator {
    settings: CoordinatorSettings,
    state: CoordinationState,
    store: PatchStore,
    gate: AdmissionGate,
    invoker: Arc<dyn PatchInvoker>,
    signals: SignalBus,
    log: Option<StatusLog>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    /// Pending files not newer than this were superseded by a finished patch.
    watermark: Option<SystemTime>,
    publish: watch::Sender<CoordinationState>,
}

impl Coordinator {
    pub fn new(
        settings: CoordinatorSettings,
        store: PatchStore,
        gate: AdmissionGate,
        invoker: Arc<dyn PatchInvoker>,
        signals: SignalBus,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let state = CoordinationState::default();
        let (publish, _) = watch::channel(state.clone());
        Self {
            settings,
            state,
            store,
            gate,
            invoker,
            signals,
            log: None,
            done_tx,
            done_rx,
            watermark: None,
            publish,
        }
    }

    pub fn with_log(mut self, log: StatusLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn state(&self) -> &CoordinationState {
        &self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinationState> {
        self.publish.subscribe()
    }

    pub fn store(&self) -> &PatchStore {
        &self.store
    }

    /// One coordinator pass.
    pub async fn tick(&mut self, view: &HealthView) -> TickOutcome {
        self.harvest().await;

        self.state.last_tick = Some(Utc::now());
        self.state.last_sentinel_check = view.last_sentinel_check;
        self.state.last_watchdog_check = view.last_watchdog_check;

        if let Some(reason) = self.block_reason(view) {
            self.state.phase = match reason {
                BlockReason::AlreadyProcessing => CoordinatorPhase::Processing,
                BlockReason::TooManyErrors { .. } => CoordinatorPhase::Error,
                _ => CoordinatorPhase::Coordinating,
            };
            if self.state.block_reason.as_ref() != Some(&reason) {
                info!(reason = %reason, phase = %self.state.phase, "patch processing blocked");
                self.note(&format!("blocked: {reason}")).await;
            }
            self.state.block_reason = Some(reason.clone());
            self.publish();
            return TickOutcome::Blocked(reason);
        }

        if self.state.block_reason.take().is_some() {
            info!("patch processing unblocked");
        }
        let outcome = match self.dispatch().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                self.record_error(&message);
                TickOutcome::Error(message)
            }
        };
        self.publish();
        outcome
    }

    /// The first condition that forbids dequeuing, in priority order.
    pub fn block_reason(&self, view: &HealthView) -> Option<BlockReason> {
        if self.state.is_processing {
            return Some(BlockReason::AlreadyProcessing);
        }
        if !view.sentinel_healthy {
            return Some(BlockReason::SentinelUnhealthy);
        }
        if !view.watchdog_healthy {
            return Some(BlockReason::WatchdogUnhealthy);
        }
        if view.daemon_count < self.settings.quorum {
            return Some(BlockReason::InsufficientDaemons {
                running: view.daemon_count,
                quorum: self.settings.quorum,
            });
        }
        if self.state.consecutive_errors >= self.settings.max_consecutive_errors {
            return Some(BlockReason::TooManyErrors {
                consecutive: self.state.consecutive_errors,
                max: self.settings.max_consecutive_errors,
            });
        }
        None
    }

    async fn dispatch(&mut self) -> Result<TickOutcome> {
        let Some(mut stored) = self.store.newest_pending(self.watermark).await? else {
            self.state.phase = CoordinatorPhase::Idle;
            return Ok(TickOutcome::Idle);
        };
        let id = stored.patch.id.clone();

        // Already finished but never moved out of the pending directory.
        if stored.patch.status.is_terminal() {
            debug!(patch = %id, status = %stored.patch.status, "moving finished patch out of pending");
            self.store.complete(&stored).await?;
            self.advance_watermark(stored.modified);
            self.state.phase = CoordinatorPhase::Idle;
            return Ok(TickOutcome::Idle);
        }

        match self.gate.admit(&stored.patch) {
            Admission::Blocked { marker, reason } => {
                stored.patch.transition(PatchStatus::Blocked)?;
                stored.patch.reason = Some(reason.clone());
                self.store.complete(&stored).await?;
                self.advance_watermark(stored.modified);
                self.state.blocked += 1;
                self.state.phase = CoordinatorPhase::Idle;

                warn!(patch = %id, marker, reason = %reason, "patch blocked at admission");
                self.note(&format!("patch {id} blocked: {reason}")).await;
                self.signals.emit(Signal::PatchComplete {
                    patch_id: marker.to_string(),
                    source_patch: id.clone(),
                    status: PatchStatus::Blocked,
                    reason: Some(reason),
                });
                Ok(TickOutcome::Rejected { patch_id: id, marker })
            }
            Admission::Admitted {
                role,
                hash_verified,
            } => {
                stored.patch.validation.role_verified = true;
                stored.patch.validation.diff_verified = hash_verified;

                self.state.is_processing = true;
                self.state.in_flight_patch = Some(id.clone());
                self.state.phase = CoordinatorPhase::Processing;
                info!(patch = %id, role = %role, "executing patch");
                self.note(&format!("patch {id} dispatched (role {role})")).await;

                self.spawn_execution(stored);
                Ok(TickOutcome::Dispatched(id))
            }
        }
    }

    fn spawn_execution(&self, stored: StoredPatch) {
        let invoker = Arc::clone(&self.invoker);
        let done = self.done_tx.clone();
        let timeout = self.settings.exec_timeout;

        tokio::spawn(async move {
            let patch = stored.patch.clone();
            let path = stored.path.clone();
            let run = tokio::spawn(async move {
                tokio::time::timeout(timeout, invoker.execute(&patch, &path)).await
            });
            let result = match run.await {
                Ok(Ok(Ok(output))) => Ok(output),
                Ok(Ok(Err(e))) => Err(e.to_string()),
                Ok(Err(_)) => Err(format!("execution timed out after {}ms", timeout.as_millis())),
                Err(e) => Err(format!("execution task failed: {e}")),
            };
            // The receiver lives as long as the coordinator.
            let _ = done.send(Completion { stored, result });
        });
    }

    /// Wait for the in-flight execution to report back.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.done_rx.recv().await
    }

    /// Apply every completion that has already arrived.
    async fn harvest(&mut self) {
        while let Ok(completion) = self.done_rx.try_recv() {
            self.finish(completion).await;
        }
    }

    /// Record the outcome of one execution. Returns the patch's new status.
    pub async fn finish(&mut self, completion: Completion) -> PatchStatus {
        let Completion { mut stored, result } = completion;
        let id = stored.patch.id.clone();
        self.state.is_processing = false;
        self.state.in_flight_patch = None;

        let status = match result {
            Ok(output) => self.finish_applied(&mut stored, output.trim()).await,
            Err(error) => self.finish_failed(&mut stored, error).await,
        };
        match status {
            Ok(status) => {
                self.publish();
                status
            }
            Err(e) => {
                warn!(patch = %id, error = %e, "failed to record patch outcome");
                self.record_error(&e.to_string());
                self.publish();
                stored.patch.status
            }
        }
    }

    async fn finish_applied(&mut self, stored: &mut StoredPatch, output: &str) -> Result<PatchStatus> {
        let id = stored.patch.id.clone();
        stored.patch.transition(PatchStatus::Applied)?;
        stored.patch.attempts += 1;
        self.store.complete(stored).await?;
        self.advance_watermark(stored.modified);

        self.state.applied += 1;
        self.state.consecutive_errors = 0;
        self.state.last_error = None;
        self.state.phase = CoordinatorPhase::Idle;

        info!(patch = %id, "patch applied");
        if output.is_empty() {
            self.note(&format!("patch {id} applied")).await;
        } else {
            self.note(&format!("patch {id} applied: {output}")).await;
        }
        self.signals.emit(Signal::PatchComplete {
            patch_id: id.clone(),
            source_patch: id,
            status: PatchStatus::Applied,
            reason: None,
        });
        Ok(PatchStatus::Applied)
    }

    async fn finish_failed(&mut self, stored: &mut StoredPatch, error: String) -> Result<PatchStatus> {
        let id = stored.patch.id.clone();
        stored.patch.attempts += 1;
        warn!(patch = %id, attempt = stored.patch.attempts, error = %error, "patch execution failed");
        self.record_error(&format!("patch {id}: {error}"));
        self.note(&format!(
            "patch {id} attempt {} failed: {error}",
            stored.patch.attempts
        ))
        .await;

        if stored.patch.attempts < self.settings.max_patch_attempts {
            self.store.save_pending(stored).await?;
            return Ok(PatchStatus::Pending);
        }

        stored.patch.transition(PatchStatus::Failed)?;
        stored.patch.reason = Some(error.clone());
        self.store.complete(stored).await?;
        self.advance_watermark(stored.modified);
        self.state.failed += 1;
        self.signals.emit(Signal::PatchComplete {
            patch_id: id.clone(),
            source_patch: id,
            status: PatchStatus::Failed,
            reason: Some(error),
        });
        Ok(PatchStatus::Failed)
    }

    /// Clear the consecutive-error latch after operator intervention.
    pub fn reset_errors(&mut self) {
        self.state.consecutive_errors = 0;
        self.state.last_error = None;
        if self.state.phase == CoordinatorPhase::Error {
            self.state.phase = CoordinatorPhase::Idle;
        }
        if matches!(self.state.block_reason, Some(BlockReason::TooManyErrors { .. })) {
            self.state.block_reason = None;
        }
        self.publish();
    }

    fn record_error(&mut self, message: &str) {
        self.state.consecutive_errors = self.state.consecutive_errors.saturating_add(1);
        self.state.last_error = Some(message.to_string());
        self.state.phase = CoordinatorPhase::Error;
        self.signals.emit(Signal::CoordinatorError {
            error: message.to_string(),
            consecutive_errors: self.state.consecutive_errors,
        });
    }

    fn advance_watermark(&mut self, modified: SystemTime) {
        self.watermark = Some(self.watermark.map_or(modified, |w| w.max(modified)));
    }

    async fn note(&self, message: &str) {
        if let Some(log) = &self.log {
            if let Err(e) = log.append(message).await {
                warn!(error = %e, "failed to write coordinator log");
            }
        }
    }

    fn publish(&self) {
        self.publish.send_replace(self.state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::RoleVerifier;
    use crate::invoker::InvokeError;
    use async_trait::async_trait;
    use std::path::Path;
    use wd_core::types::Patch;

    struct NeverInvoked;

    #[async_trait]
    impl PatchInvoker for NeverInvoked {
        async fn execute(&self, _: &Patch, _: &Path) -> std::result::Result<String, InvokeError> {
            Ok(String::new())
        }
    }

    fn coordinator(quorum: usize) -> Coordinator {
        Coordinator::new(
            CoordinatorSettings {
                quorum,
                max_consecutive_errors: 2,
                exec_timeout: Duration::from_secs(1),
                max_patch_attempts: 3,
            },
            PatchStore::new("/nonexistent/warden-patches"),
            AdmissionGate::new(RoleVerifier::new(["GPT"])),
            Arc::new(NeverInvoked),
            SignalBus::local(),
        )
    }

    fn healthy(daemons: usize) -> HealthView {
        HealthView {
            sentinel_healthy: true,
            watchdog_healthy: true,
            daemon_count: daemons,
            last_sentinel_check: None,
            last_watchdog_check: None,
        }
    }

    #[test]
    fn block_reasons_follow_priority() {
        let mut c = coordinator(2);
        let mut view = healthy(1);
        view.watchdog_healthy = false;
        assert_eq!(c.block_reason(&view), Some(BlockReason::WatchdogUnhealthy));
        view.sentinel_healthy = false;
        assert_eq!(c.block_reason(&view), Some(BlockReason::SentinelUnhealthy));

        c.state.is_processing = true;
        assert_eq!(c.block_reason(&view), Some(BlockReason::AlreadyProcessing));
    }

    #[test]
    fn error_latch_blocks_until_reset() {
        let mut c = coordinator(1);
        c.record_error("one");
        assert_eq!(c.block_reason(&healthy(1)), None);
        c.record_error("two");
        assert_eq!(
            c.block_reason(&healthy(1)),
            Some(BlockReason::TooManyErrors {
                consecutive: 2,
                max: 2
            })
        );
        c.reset_errors();
        assert_eq!(c.block_reason(&healthy(1)), None);
        assert_eq!(c.state().phase, CoordinatorPhase::Idle);
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let mut c = coordinator(1);
        assert_eq!(c.tick(&healthy(1)).await, TickOutcome::Idle);
        assert_eq!(c.state().phase, CoordinatorPhase::Idle);
        assert!(c.state().last_tick.is_some());
    }
}
