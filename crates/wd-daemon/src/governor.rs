use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use wd_core::config::GovernorConfig;
use wd_core::status_log::StatusLog;
use wd_core::types::{
    DaemonRuntimeState, DaemonSpec, DaemonStatus, RestartAttempt, RestartOutcome,
};

use crate::inspector::{Liveness, ProcessInspector};
use crate::launcher::DaemonLauncher;
use crate::restart_policy::RestartPolicy;
use crate::signal_bus::{Signal, SignalBus};
use crate::topology::{startup_order, TopologyError};

const HISTORY_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("configuration error: {0}")]
    Configuration(#[from] TopologyError),

    #[error("unknown daemon: {0}")]
    UnknownDaemon(String),

    #[error("daemon {daemon}: dependency not ready ({dependency})")]
    DependencyNotReady { daemon: String, dependency: String },

    #[error("daemon {daemon}: restart attempts exhausted ({attempts})")]
    RestartExhausted { daemon: String, attempts: u32 },

    #[error("daemon {daemon} cannot do that while {status}")]
    InvalidState { daemon: String, status: DaemonStatus },

    #[error("daemon {daemon} failed to start: {reason}")]
    StartFailed { daemon: String, reason: String },

    #[error("daemon {daemon} did not stop: {reason}")]
    StopFailed { daemon: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GovernorError>;

// ---------------------------------------------------------------------------
// Public views
// ---------------------------------------------------------------------------

/// Who asked for a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartSource {
    Governor,
    Watchdog,
    Manual,
}

impl fmt::Display for RestartSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RestartSource::Governor => "governor",
            RestartSource::Watchdog => "watchdog",
            RestartSource::Manual => "manual",
        };
        write!(f, "{}", label)
    }
}

/// Read-only copy of governor state published after every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GovernorSnapshot {
    /// In startup order.
    pub daemons: Vec<DaemonRuntimeState>,
    pub startup_order: Vec<String>,
    pub pending: Vec<String>,
    pub restarts: Vec<RestartAttempt>,
}

impl GovernorSnapshot {
    pub fn running_count(&self) -> usize {
        self.daemons.iter().filter(|d| d.is_running()).count()
    }

    pub fn daemon(&self, name: &str) -> Option<&DaemonRuntimeState> {
        self.daemons.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Timings {
    stop_grace: Duration,
    launch_timeout: Duration,
    liveness_poll: Duration,
}

// ---------------------------------------------------------------------------
// Governor
// ---------------------------------------------------------------------------

/// Owns every daemon's runtime state and the only restart policy.
///
/// All operations take `&mut self`; the runtime loop is the single owner and
/// other tasks observe state through [`Governor::subscribe`].
pub struct Governor {
    specs: HashMap<String, DaemonSpec>,
    states: BTreeMap<String, DaemonRuntimeState>,
    order: Vec<String>,
    queue: VecDeque<String>,
    /// Daemons in the order they last reached `running`.
    started: Vec<String>,
    /// Monotonic time of each daemon's last successful liveness sample.
    sampled_at: HashMap<String, Instant>,
    policy: RestartPolicy,
    timings: Timings,
    inspector: Arc<dyn ProcessInspector>,
    launcher: Arc<dyn DaemonLauncher>,
    signals: SignalBus,
    restart_log: Option<StatusLog>,
    history: VecDeque<RestartAttempt>,
    snapshot_tx: watch::Sender<GovernorSnapshot>,
}

impl Governor {
    /// Build the startup queue. Cycles, unknown dependencies and duplicate
    /// names are rejected here, before anything is launched.
    pub fn new(
        specs: Vec<DaemonSpec>,
        config: &GovernorConfig,
        inspector: Arc<dyn ProcessInspector>,
        launcher: Arc<dyn DaemonLauncher>,
        signals: SignalBus,
    ) -> Result<Self> {
        let order = startup_order(&specs)?;
        let states = specs
            .iter()
            .map(|s| (s.name.clone(), DaemonRuntimeState::new(s.name.clone())))
            .collect();
        let specs: HashMap<String, DaemonSpec> =
            specs.into_iter().map(|s| (s.name.clone(), s)).collect();
        let (snapshot_tx, _) = watch::channel(GovernorSnapshot::default());

        info!(order = ?order, "startup queue built");
        let governor = Self {
            specs,
            states,
            queue: order.iter().cloned().collect(),
            order,
            started: Vec::new(),
            sampled_at: HashMap::new(),
            policy: RestartPolicy::from_config(config),
            timings: Timings {
                stop_grace: config.stop_grace(),
                launch_timeout: config.launch_timeout(),
                liveness_poll: config.liveness_poll(),
            },
            inspector,
            launcher,
            signals,
            restart_log: None,
            history: VecDeque::new(),
            snapshot_tx,
        };
        governor.publish();
        Ok(governor)
    }

    /// Also append every restart attempt to `log`.
    pub fn with_restart_log(mut self, log: StatusLog) -> Self {
        self.restart_log = Some(log);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<GovernorSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn startup_order(&self) -> &[String] {
        &self.order
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn specs(&self) -> impl Iterator<Item = &DaemonSpec> {
        self.order.iter().filter_map(|n| self.specs.get(n))
    }

    pub fn state(&self, name: &str) -> Option<&DaemonRuntimeState> {
        self.states.get(name)
    }

    pub fn running_count(&self) -> usize {
        self.states.values().filter(|s| s.is_running()).count()
    }

    pub fn restart_history(&self) -> impl Iterator<Item = &RestartAttempt> {
        self.history.iter()
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        GovernorSnapshot {
            daemons: self
                .order
                .iter()
                .filter_map(|n| self.states.get(n).cloned())
                .collect(),
            startup_order: self.order.clone(),
            pending: self.queue.iter().cloned().collect(),
            restarts: self.history.iter().cloned().collect(),
        }
    }

    // ------------------------------------------------------------------
    // start / stop
    // ------------------------------------------------------------------

    /// Launch `name` once every dependency is running, then wait up to its
    /// startup timeout for the inspector to see it.
    pub async fn start(&mut self, name: &str) -> Result<()> {
        let spec = self.spec(name)?.clone();
        let state = self.state_ref(name)?.clone();
        if state.exhausted {
            return Err(GovernorError::RestartExhausted {
                daemon: name.to_string(),
                attempts: state.restart_count,
            });
        }
        match state.status {
            DaemonStatus::Stopped | DaemonStatus::Failed => {}
            DaemonStatus::Running => return Ok(()),
            status => {
                return Err(GovernorError::InvalidState {
                    daemon: name.to_string(),
                    status,
                })
            }
        }

        for dep in &spec.dependencies {
            if !self.dependency_ready(dep).await {
                debug!(daemon = %name, dependency = %dep, "dependency not ready");
                return Err(GovernorError::DependencyNotReady {
                    daemon: name.to_string(),
                    dependency: dep.clone(),
                });
            }
        }

        self.set_status(name, DaemonStatus::Starting);
        info!(daemon = %name, "starting daemon");

        let launched =
            match tokio::time::timeout(self.timings.launch_timeout, self.launcher.launch(&spec))
                .await
            {
                Ok(Ok(pid)) => pid,
                Ok(Err(e)) => return Err(self.fail_start(&spec, None, e.to_string()).await),
                Err(_) => {
                    let reason = format!("launch timed out after {:?}", self.timings.launch_timeout);
                    return Err(self.fail_start(&spec, None, reason).await);
                }
            };

        let live = self.wait_for_liveness(&spec, spec.startup_timeout()).await;
        if !live.alive {
            let reason = live.error.unwrap_or_else(|| {
                format!("not alive within {:?}", spec.startup_timeout())
            });
            return Err(self.fail_start(&spec, Some(launched), reason).await);
        }

        let pid = live.pid.unwrap_or(launched);
        let now = Utc::now();
        if let Some(state) = self.states.get_mut(name) {
            state.status = DaemonStatus::Running;
            state.pid = Some(pid);
            state.started_at = Some(now);
            state.last_health_check = Some(now);
            state.last_error = None;
        }
        self.sampled_at.insert(name.to_string(), Instant::now());
        self.started.retain(|n| n != name);
        self.started.push(name.to_string());
        info!(daemon = %name, pid, "daemon running");
        self.signals.emit(Signal::DaemonStarted {
            daemon: name.to_string(),
            pid: Some(pid),
        });
        self.publish();
        Ok(())
    }

    /// Ask `name` to exit, force it after the grace period, and confirm it
    /// is gone.
    pub async fn stop(&mut self, name: &str) -> Result<()> {
        let spec = self.spec(name)?.clone();
        let state = self.state_ref(name)?;
        let (status, mut pid) = (state.status, state.pid);
        match status {
            DaemonStatus::Stopped => return Ok(()),
            DaemonStatus::Starting | DaemonStatus::Stopping => {
                return Err(GovernorError::InvalidState {
                    daemon: name.to_string(),
                    status,
                })
            }
            DaemonStatus::Running | DaemonStatus::Failed => {}
        }

        if pid.is_none() {
            pid = self.inspector.is_alive(&spec).await.pid;
        }

        self.set_status(name, DaemonStatus::Stopping);
        info!(daemon = %name, pid = ?pid, "stopping daemon");

        if pid.is_some() {
            match tokio::time::timeout(
                self.timings.launch_timeout,
                self.launcher.terminate(&spec, pid),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(daemon = %name, error = %e, "terminate failed"),
                Err(_) => warn!(daemon = %name, "terminate timed out"),
            }
        }

        let mut live = self.wait_for_exit(&spec, self.timings.stop_grace).await;
        if live.alive {
            let target = live.pid.or(pid);
            warn!(daemon = %name, pid = ?target, "grace period elapsed, killing");
            match tokio::time::timeout(self.timings.launch_timeout, self.launcher.kill(&spec, target))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(daemon = %name, error = %e, "kill failed"),
                Err(_) => warn!(daemon = %name, "kill timed out"),
            }
            live = self.wait_for_exit(&spec, self.timings.launch_timeout).await;
        }

        if live.alive {
            let reason = format!("still alive (pid {:?}) after kill", live.pid);
            if let Some(state) = self.states.get_mut(name) {
                state.status = DaemonStatus::Failed;
                state.pid = live.pid;
                state.last_error = Some(reason.clone());
            }
            warn!(daemon = %name, %reason, "daemon did not stop");
            self.publish();
            return Err(GovernorError::StopFailed {
                daemon: name.to_string(),
                reason,
            });
        }

        if let Some(state) = self.states.get_mut(name) {
            state.status = DaemonStatus::Stopped;
            state.pid = None;
        }
        self.sampled_at.remove(name);
        info!(daemon = %name, "daemon stopped");
        self.signals.emit(Signal::DaemonStopped {
            daemon: name.to_string(),
        });
        self.publish();
        Ok(())
    }

    // ------------------------------------------------------------------
    // restart
    // ------------------------------------------------------------------

    /// Stop then start `name`, subject to cool-down. Calls inside the
    /// cool-down window, or while the daemon is starting, change nothing.
    pub async fn restart(&mut self, name: &str) -> Result<RestartOutcome> {
        self.restart_from(name, RestartSource::Manual).await
    }

    /// Restart on behalf of a health monitor. Daemons that were never
    /// started, are being stopped, or are actually alive are left alone;
    /// a running daemon found dead is recorded as failed first.
    pub async fn request_restart(
        &mut self,
        name: &str,
        source: RestartSource,
    ) -> Result<RestartOutcome> {
        let spec = self.spec(name)?.clone();
        let state = self.state_ref(name)?;
        let (status, exhausted) = (state.status, state.exhausted);
        match status {
            DaemonStatus::Starting => return Ok(RestartOutcome::AlreadyStarting),
            DaemonStatus::Stopped | DaemonStatus::Stopping => {
                debug!(daemon = %name, %source, %status, "restart request ignored");
                return Ok(RestartOutcome::NotEligible);
            }
            DaemonStatus::Failed if exhausted => return Ok(RestartOutcome::Exhausted),
            DaemonStatus::Failed => {}
            DaemonStatus::Running => {
                let live = self.sample(&spec).await;
                if live.alive {
                    return Ok(RestartOutcome::NotEligible);
                }
                let reason = live
                    .error
                    .unwrap_or_else(|| "process not found".to_string());
                self.record_failure(name, reason);
                if self.state_ref(name)?.exhausted {
                    return Ok(RestartOutcome::Exhausted);
                }
            }
        }
        self.restart_from(name, source).await
    }

    async fn restart_from(&mut self, name: &str, source: RestartSource) -> Result<RestartOutcome> {
        self.spec(name)?;
        let state = self.state_ref(name)?.clone();
        if state.exhausted {
            self.audit(name, state.restart_count, RestartOutcome::Exhausted, None, source)
                .await;
            return Err(GovernorError::RestartExhausted {
                daemon: name.to_string(),
                attempts: state.restart_count,
            });
        }
        if state.status == DaemonStatus::Starting {
            return Ok(RestartOutcome::AlreadyStarting);
        }
        if let Some(left) = self
            .policy
            .remaining(name, state.restart_count, Instant::now())
        {
            debug!(daemon = %name, %source, remaining_ms = left.as_millis() as u64, "restart in cool-down");
            return Ok(RestartOutcome::InCoolDown);
        }

        self.policy.record_attempt(name, Instant::now());
        if let Some(s) = self.states.get_mut(name) {
            s.last_restart_at = Some(Utc::now());
        }
        info!(daemon = %name, %source, attempt = state.restart_count, "restarting daemon");

        if matches!(state.status, DaemonStatus::Running | DaemonStatus::Failed) {
            if let Err(e) = self.stop(name).await {
                let error = e.to_string();
                self.audit(name, state.restart_count, RestartOutcome::Failed, Some(error), source)
                    .await;
                return Ok(RestartOutcome::Failed);
            }
        }

        let (outcome, error) = match self.start(name).await {
            Ok(()) => (RestartOutcome::Started, None),
            Err(e @ GovernorError::DependencyNotReady { .. }) => {
                (RestartOutcome::DependencyNotReady, Some(e.to_string()))
            }
            Err(e @ GovernorError::RestartExhausted { .. }) => {
                (RestartOutcome::Exhausted, Some(e.to_string()))
            }
            Err(e) => (RestartOutcome::Failed, Some(e.to_string())),
        };
        // The stop above left it `Stopped`; only the queue starts it from here.
        if outcome == RestartOutcome::DependencyNotReady && !self.queue.iter().any(|n| n == name) {
            debug!(daemon = %name, "dependency not ready, re-queued for start");
            self.queue.push_back(name.to_string());
        }
        let attempt = self.state_ref(name)?.restart_count;
        self.audit(name, attempt, outcome, error, source).await;
        if outcome == RestartOutcome::Started {
            self.signals.emit(Signal::DaemonRestarted {
                daemon: name.to_string(),
                attempt,
                source: source.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Clear a daemon's failure history so it can be started again.
    pub fn reset(&mut self, name: &str) -> Result<()> {
        self.spec(name)?;
        let state = self
            .states
            .get_mut(name)
            .ok_or_else(|| GovernorError::UnknownDaemon(name.to_string()))?;
        state.restart_count = 0;
        state.exhausted = false;
        state.last_error = None;
        state.last_restart_at = None;
        if state.status == DaemonStatus::Failed {
            state.status = DaemonStatus::Stopped;
            state.pid = None;
        }
        let requeue = state.status == DaemonStatus::Stopped;
        self.policy.reset(name);
        if requeue && !self.queue.iter().any(|n| n == name) {
            self.queue.push_back(name.to_string());
        }
        info!(daemon = %name, "daemon reset");
        self.publish();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    /// Re-check running daemons, retry failed ones, then advance the
    /// startup queue.
    pub async fn govern_tick(&mut self) {
        let running: Vec<String> = self
            .order
            .iter()
            .filter(|n| self.states.get(*n).is_some_and(|s| s.is_running()))
            .cloned()
            .collect();
        for name in running {
            let Some(spec) = self.specs.get(&name).cloned() else {
                continue;
            };
            let live = self.sample(&spec).await;
            if live.alive {
                continue;
            }
            let reason = live
                .error
                .unwrap_or_else(|| "process not found".to_string());
            warn!(daemon = %name, %reason, "running daemon is not alive");
            self.record_failure(&name, reason);
            self.restart_logged(&name, RestartSource::Governor).await;
        }

        // Failed daemons that already left the queue are retried here; the
        // policy keeps this to one attempt per cool-down window.
        let retry: Vec<String> = self
            .order
            .iter()
            .filter(|n| !self.queue.contains(*n))
            .filter(|n| {
                self.states
                    .get(*n)
                    .is_some_and(|s| s.status == DaemonStatus::Failed && !s.exhausted)
            })
            .cloned()
            .collect();
        for name in retry {
            self.restart_logged(&name, RestartSource::Governor).await;
        }

        self.advance_queue().await;
        self.publish();
    }

    async fn advance_queue(&mut self) {
        while let Some(head) = self.queue.front().cloned() {
            let Some((status, exhausted)) = self.states.get(&head).map(|s| (s.status, s.exhausted))
            else {
                self.queue.pop_front();
                continue;
            };
            if exhausted {
                warn!(daemon = %head, "dropping exhausted daemon from startup queue");
                self.queue.pop_front();
                continue;
            }
            let done = match status {
                DaemonStatus::Running => true,
                DaemonStatus::Stopped => match self.start(&head).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(daemon = %head, error = %e, "queue head not started");
                        false
                    }
                },
                DaemonStatus::Failed => {
                    self.restart_logged(&head, RestartSource::Governor).await
                        == Some(RestartOutcome::Started)
                }
                DaemonStatus::Starting | DaemonStatus::Stopping => false,
            };
            let exhausted = self.states.get(&head).is_some_and(|s| s.exhausted);
            if done || exhausted {
                self.queue.pop_front();
            }
            if !done {
                break;
            }
        }
    }

    /// Stop every daemon in reverse of the order they came up, each with its
    /// own grace period. Returns the daemons that could not be stopped.
    pub async fn shutdown_all(&mut self) -> Vec<GovernorError> {
        self.queue.clear();
        let mut order: Vec<String> = self.started.iter().rev().cloned().collect();
        // Anything running or failed that was not tracked as started.
        for name in self.order.iter().rev() {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }

        info!(count = order.len(), "stopping all daemons");
        let mut errors = Vec::new();
        for name in order {
            let needs_stop = self
                .states
                .get(&name)
                .is_some_and(|s| s.status != DaemonStatus::Stopped);
            if !needs_stop {
                continue;
            }
            if let Err(e) = self.stop(&name).await {
                warn!(daemon = %name, error = %e, "failed to stop daemon during shutdown");
                errors.push(e);
            }
        }
        self.started.clear();
        self.publish();
        errors
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn spec(&self, name: &str) -> Result<&DaemonSpec> {
        self.specs
            .get(name)
            .ok_or_else(|| GovernorError::UnknownDaemon(name.to_string()))
    }

    fn state_ref(&self, name: &str) -> Result<&DaemonRuntimeState> {
        self.states
            .get(name)
            .ok_or_else(|| GovernorError::UnknownDaemon(name.to_string()))
    }

    fn set_status(&mut self, name: &str, status: DaemonStatus) {
        if let Some(state) = self.states.get_mut(name) {
            state.status = status;
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// Query the inspector and stamp the health-check time when alive.
    async fn sample(&mut self, spec: &DaemonSpec) -> Liveness {
        let live = self.inspector.is_alive(spec).await;
        if live.alive {
            self.sampled_at.insert(spec.name.clone(), Instant::now());
            if let Some(state) = self.states.get_mut(&spec.name) {
                state.last_health_check = Some(Utc::now());
                if live.pid.is_some() {
                    state.pid = live.pid;
                }
            }
        }
        live
    }

    /// A dependency counts only if it is `running` and its latest sample is
    /// younger than its health-check interval; otherwise it is re-sampled.
    async fn dependency_ready(&mut self, dep: &str) -> bool {
        let Some(spec) = self.specs.get(dep).cloned() else {
            return false;
        };
        if !self.states.get(dep).is_some_and(|s| s.is_running()) {
            return false;
        }
        let fresh = self
            .sampled_at
            .get(dep)
            .is_some_and(|at| at.elapsed() <= spec.health_check_interval());
        fresh || self.sample(&spec).await.alive
    }

    async fn wait_for_liveness(&self, spec: &DaemonSpec, timeout: Duration) -> Liveness {
        let deadline = Instant::now() + timeout;
        loop {
            let live = self.inspector.is_alive(spec).await;
            let now = Instant::now();
            if live.alive || now >= deadline {
                return live;
            }
            tokio::time::sleep(self.timings.liveness_poll.min(deadline - now)).await;
        }
    }

    async fn wait_for_exit(&self, spec: &DaemonSpec, timeout: Duration) -> Liveness {
        let deadline = Instant::now() + timeout;
        loop {
            let live = self.inspector.is_alive(spec).await;
            let now = Instant::now();
            if !live.alive || now >= deadline {
                return live;
            }
            tokio::time::sleep(self.timings.liveness_poll.min(deadline - now)).await;
        }
    }

    async fn fail_start(
        &mut self,
        spec: &DaemonSpec,
        launched: Option<u32>,
        reason: String,
    ) -> GovernorError {
        if launched.is_some() {
            // Do not leave a process behind that the inspector cannot see.
            if let Err(e) = self.launcher.kill(spec, launched).await {
                debug!(daemon = %spec.name, error = %e, "cleanup kill failed");
            }
        }
        warn!(daemon = %spec.name, %reason, "daemon failed to start");
        self.record_failure(&spec.name, reason.clone());
        GovernorError::StartFailed {
            daemon: spec.name.clone(),
            reason,
        }
    }

    /// Count one failure. Past the configured maximum the daemon is marked
    /// exhausted instead and the count stays at the cap.
    fn record_failure(&mut self, name: &str, error: String) {
        let max = self.specs.get(name).map_or(0, |s| s.max_restart_attempts);
        let Some(state) = self.states.get_mut(name) else {
            return;
        };
        state.status = DaemonStatus::Failed;
        state.pid = None;
        state.last_error = Some(error.clone());
        self.sampled_at.remove(name);

        if state.restart_count >= max {
            state.exhausted = true;
            let restart_count = state.restart_count;
            warn!(daemon = %name, restart_count, "restart attempts exhausted, daemon permanently failed");
            self.signals.emit(Signal::DaemonExhausted {
                daemon: name.to_string(),
                restart_count,
            });
        } else {
            state.restart_count += 1;
            let restart_count = state.restart_count;
            self.signals.emit(Signal::DaemonFailed {
                daemon: name.to_string(),
                error,
                restart_count,
            });
        }
        self.publish();
    }

    async fn restart_logged(&mut self, name: &str, source: RestartSource) -> Option<RestartOutcome> {
        match self.restart_from(name, source).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                debug!(daemon = %name, error = %e, "restart refused");
                None
            }
        }
    }

    async fn audit(
        &mut self,
        name: &str,
        attempt: u32,
        outcome: RestartOutcome,
        error: Option<String>,
        source: RestartSource,
    ) {
        let record = RestartAttempt {
            daemon: name.to_string(),
            timestamp: Utc::now(),
            attempt,
            outcome,
            error,
        };
        if let Some(log) = &self.restart_log {
            let mut line = format!("restart {name} attempt {attempt} ({source}): {outcome}");
            if let Some(err) = &record.error {
                line.push_str(&format!(" - {err}"));
            }
            if let Err(e) = log.append(&line).await {
                warn!(error = %e, "failed to write restart log");
            }
        }
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(record);
        self.publish();
    }
}
