use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DaemonSpec
// ---------------------------------------------------------------------------

/// How to launch a daemon process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRef {
    /// Program to execute (absolute path or something on `$PATH`).
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Words looked for among a process's arguments. Defaults to the daemon name.
    #[serde(default)]
    pub match_pattern: Option<String>,
}

impl ExecRef {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            match_pattern: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Immutable description of a managed daemon, fixed at init.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSpec {
    pub name: String,
    /// Lower values start first when the dependency graph allows it.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    pub exec: ExecRef,
}

fn default_priority() -> u32 {
    100
}
fn default_startup_timeout_ms() -> u64 {
    10_000
}
fn default_health_check_interval_ms() -> u64 {
    10_000
}
fn default_max_restart_attempts() -> u32 {
    3
}

impl DaemonSpec {
    pub fn new(name: impl Into<String>, exec: ExecRef) -> Self {
        Self {
            name: name.into(),
            priority: default_priority(),
            dependencies: BTreeSet::new(),
            startup_timeout_ms: default_startup_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            max_restart_attempts: default_max_restart_attempts(),
            exec,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval_ms = duration_ms(interval);
        self
    }

    pub fn with_max_restart_attempts(mut self, attempts: u32) -> Self {
        self.max_restart_attempts = attempts;
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// The string the process inspector looks for in the process table.
    pub fn match_pattern(&self) -> &str {
        self.exec.match_pattern.as_deref().unwrap_or(&self.name)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// DaemonStatus / DaemonRuntimeState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DaemonStatus::Stopped => "stopped",
            DaemonStatus::Starting => "starting",
            DaemonStatus::Running => "running",
            DaemonStatus::Stopping => "stopping",
            DaemonStatus::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// Mutable view of one daemon. Only the governor writes these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRuntimeState {
    pub name: String,
    pub status: DaemonStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set once `restart_count` has hit the configured maximum and another
    /// failure arrived. Cleared only by a manual reset.
    pub exhausted: bool,
    pub last_restart_at: Option<DateTime<Utc>>,
}

impl DaemonRuntimeState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: DaemonStatus::Stopped,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_health_check: None,
            last_error: None,
            exhausted: false,
            last_restart_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == DaemonStatus::Running
    }
}

// ---------------------------------------------------------------------------
// Restart audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartOutcome {
    Started,
    Failed,
    InCoolDown,
    AlreadyStarting,
    DependencyNotReady,
    Exhausted,
    NotEligible,
}

impl RestartOutcome {
    /// Outcomes that leave the daemon untouched.
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            RestartOutcome::InCoolDown | RestartOutcome::AlreadyStarting | RestartOutcome::NotEligible
        )
    }
}

impl fmt::Display for RestartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RestartOutcome::Started => "started",
            RestartOutcome::Failed => "failed",
            RestartOutcome::InCoolDown => "in cool-down",
            RestartOutcome::AlreadyStarting => "already starting",
            RestartOutcome::DependencyNotReady => "dependency not ready",
            RestartOutcome::Exhausted => "restart attempts exhausted",
            RestartOutcome::NotEligible => "not eligible",
        };
        write!(f, "{}", label)
    }
}

/// Append-only audit record of a restart attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartAttempt {
    pub daemon: String,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub outcome: RestartOutcome,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// One liveness sample for one daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub daemon: String,
    pub alive: bool,
    pub pid: Option<u32>,
    pub at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Every daemon's liveness from a single sentinel pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub at: DateTime<Utc>,
    pub records: Vec<HealthRecord>,
}

impl HealthSnapshot {
    pub fn alive_count(&self) -> usize {
        self.records.iter().filter(|r| r.alive).count()
    }

    pub fn not_running(&self) -> impl Iterator<Item = &HealthRecord> {
        self.records.iter().filter(|r| !r.alive)
    }
}

/// Aggregated health consumed by the coordinator each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthView {
    pub sentinel_healthy: bool,
    pub watchdog_healthy: bool,
    pub daemon_count: usize,
    pub last_sentinel_check: Option<DateTime<Utc>>,
    pub last_watchdog_check: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Coordination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorPhase {
    Idle,
    Processing,
    Coordinating,
    Error,
}

impl fmt::Display for CoordinatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CoordinatorPhase::Idle => "idle",
            CoordinatorPhase::Processing => "processing",
            CoordinatorPhase::Coordinating => "coordinating",
            CoordinatorPhase::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// Why a coordinator tick did not dequeue a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    AlreadyProcessing,
    SentinelUnhealthy,
    WatchdogUnhealthy,
    InsufficientDaemons { running: usize, quorum: usize },
    TooManyErrors { consecutive: u32, max: u32 },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::AlreadyProcessing => write!(f, "already processing"),
            BlockReason::SentinelUnhealthy => write!(f, "sentinel unhealthy"),
            BlockReason::WatchdogUnhealthy => write!(f, "watchdog unhealthy"),
            BlockReason::InsufficientDaemons { running, quorum } => {
                write!(f, "insufficient daemons ({running}/{quorum})")
            }
            BlockReason::TooManyErrors { consecutive, max } => {
                write!(f, "too many consecutive errors ({consecutive}/{max})")
            }
        }
    }
}

/// Coordinator-owned state. Single writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationState {
    pub phase: CoordinatorPhase,
    pub last_sentinel_check: Option<DateTime<Utc>>,
    pub last_watchdog_check: Option<DateTime<Utc>>,
    pub is_processing: bool,
    pub consecutive_errors: u32,
    pub block_reason: Option<BlockReason>,
    pub last_error: Option<String>,
    pub in_flight_patch: Option<String>,
    pub last_tick: Option<DateTime<Utc>>,
    pub applied: u64,
    pub blocked: u64,
    pub failed: u64,
}

impl Default for CoordinationState {
    fn default() -> Self {
        Self {
            phase: CoordinatorPhase::Idle,
            last_sentinel_check: None,
            last_watchdog_check: None,
            is_processing: false,
            consecutive_errors: 0,
            block_reason: None,
            last_error: None,
            in_flight_patch: None,
            last_tick: None,
            applied: 0,
            blocked: 0,
            failed: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    #[default]
    Pending,
    Applied,
    Blocked,
    Failed,
}

impl PatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PatchStatus::Pending)
    }
}

impl fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PatchStatus::Pending => "pending",
            PatchStatus::Applied => "applied",
            PatchStatus::Blocked => "blocked",
            PatchStatus::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFlags {
    /// Hex SHA-256 of `content`, when the producer declares one.
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub role_verified: bool,
    #[serde(default)]
    pub diff_verified: bool,
    /// Verdict from the summary artifact, once one has been seen.
    #[serde(default)]
    pub summary_passed: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
#[error("patch {id}: cannot move from {from} to {to}")]
pub struct PatchTransitionError {
    pub id: String,
    pub from: PatchStatus,
    pub to: PatchStatus,
}

/// A unit of change submitted for gated application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub id: String,
    #[serde(default, alias = "tag", alias = "commit_tag")]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub validation: ValidationFlags,
    #[serde(default)]
    pub status: PatchStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Patch {
    pub fn new(id: impl Into<String>, role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            content: content.into(),
            validation: ValidationFlags::default(),
            status: PatchStatus::Pending,
            attempts: 0,
            reason: None,
            completed_at: None,
        }
    }

    /// Move to `to`. Terminal states never change again.
    pub fn transition(&mut self, to: PatchStatus) -> Result<(), PatchTransitionError> {
        if self.status.is_terminal() || to == PatchStatus::Pending {
            return Err(PatchTransitionError {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder_sets_fields() {
        let spec = DaemonSpec::new("relay", ExecRef::new("/usr/bin/relay"))
            .with_priority(2)
            .depends_on("db")
            .with_startup_timeout(Duration::from_secs(3))
            .with_max_restart_attempts(7);
        assert_eq!(spec.priority, 2);
        assert!(spec.dependencies.contains("db"));
        assert_eq!(spec.startup_timeout(), Duration::from_secs(3));
        assert_eq!(spec.max_restart_attempts, 7);
        assert_eq!(spec.match_pattern(), "relay");
    }

    #[test]
    fn patch_terminal_states_are_final() {
        let mut patch = Patch::new("p1", "GPT", "diff");
        patch.transition(PatchStatus::Blocked).expect("pending -> blocked");
        assert!(patch.completed_at.is_some());
        assert!(patch.transition(PatchStatus::Applied).is_err());
        assert_eq!(patch.status, PatchStatus::Blocked);
    }

    #[test]
    fn patch_cannot_return_to_pending() {
        let mut patch = Patch::new("p2", "GPT", "diff");
        assert!(patch.transition(PatchStatus::Pending).is_err());
    }

    #[test]
    fn patch_accepts_tag_alias() {
        let patch: Patch =
            serde_json::from_str(r#"{"id":"p3","tag":"GHOST","content":"x"}"#).expect("parse");
        assert_eq!(patch.role, "GHOST");
        assert_eq!(patch.status, PatchStatus::Pending);
        assert_eq!(patch.attempts, 0);
    }

    #[test]
    fn block_reason_labels() {
        let reason = BlockReason::InsufficientDaemons {
            running: 4,
            quorum: 5,
        };
        assert_eq!(reason.to_string(), "insufficient daemons (4/5)");
        assert_eq!(BlockReason::AlreadyProcessing.to_string(), "already processing");
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&DaemonStatus::Running).expect("serialize");
        assert_eq!(json, "\"running\"");
        let json = serde_json::to_string(&CoordinatorPhase::Coordinating).expect("serialize");
        assert_eq!(json, "\"coordinating\"");
    }
}
