use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::DaemonSpec;

/// Top-level configuration loaded from `~/.warden/config.toml`.
///
/// Every section falls back to its defaults when omitted, so an empty file
/// is a valid (if daemon-less) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub daemons: Vec<DaemonSpec>,
    #[serde(default)]
    pub sentinel: SentinelConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from `~/.warden/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&text)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic checks that serde cannot express.
    ///
    /// Dependency graph problems (cycles, unknown names) are left to the
    /// governor, which reports them as configuration errors at init.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.governor.validate()?;
        self.coordinator.validate()?;
        self.admission.validate()?;
        let periods = [
            ("sentinel.interval_ms", self.sentinel.interval_ms),
            ("watchdog.interval_ms", self.watchdog.interval_ms),
            ("coordinator.tick_ms", self.coordinator.tick_ms),
            ("admission.diff_interval_ms", self.admission.diff_interval_ms),
        ];
        if let Some((key, _)) = periods.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Validation(format!("{key} must be > 0")));
        }
        for spec in &self.daemons {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "daemons entries must have a non-empty name".to_string(),
                ));
            }
            if spec.exec.program.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "daemon '{}' has an empty exec.program",
                    spec.name
                )));
            }
            if spec.health_check_interval_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "daemon '{}' health_check_interval_ms must be > 0",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Resolve `path`, expanding a leading `~/` to the home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        match path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest),
            None => PathBuf::from(path),
        }
    }

    pub fn default_path() -> PathBuf {
        Self::expand_path("~/.warden/config.toml")
    }

    pub fn state_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.state_dir)
    }

    /// Resolve a configured log or data path. Relative paths live under the
    /// state directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = Self::expand_path(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.state_dir().join(expanded)
        }
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Root for every relative log, patch and summary path.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

fn default_state_dir() -> String {
    "~/.warden".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default = "default_governor_tick_ms")]
    pub tick_ms: u64,
    /// Cool-down base; attempt `n` waits `base * 2^(n-1)`.
    #[serde(default = "default_restart_base_ms")]
    pub restart_base_ms: u64,
    #[serde(default = "default_restart_ceiling_ms")]
    pub restart_ceiling_ms: u64,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Upper bound on a single launch/terminate call.
    #[serde(default = "default_launch_timeout_ms")]
    pub launch_timeout_ms: u64,
    /// How often liveness is re-polled while waiting for start/stop.
    #[serde(default = "default_liveness_poll_ms")]
    pub liveness_poll_ms: u64,
    #[serde(default = "default_restart_log")]
    pub restart_log: String,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_governor_tick_ms(),
            restart_base_ms: default_restart_base_ms(),
            restart_ceiling_ms: default_restart_ceiling_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            launch_timeout_ms: default_launch_timeout_ms(),
            liveness_poll_ms: default_liveness_poll_ms(),
            restart_log: default_restart_log(),
        }
    }
}

impl GovernorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn restart_base(&self) -> Duration {
        Duration::from_millis(self.restart_base_ms)
    }

    pub fn restart_ceiling(&self) -> Duration {
        Duration::from_millis(self.restart_ceiling_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn liveness_poll(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 || self.liveness_poll_ms == 0 {
            return Err(ConfigError::Validation(
                "governor.tick_ms and governor.liveness_poll_ms must be > 0".to_string(),
            ));
        }
        if self.restart_ceiling_ms < self.restart_base_ms {
            return Err(ConfigError::Validation(format!(
                "governor.restart_ceiling_ms ({}) is below restart_base_ms ({})",
                self.restart_ceiling_ms, self.restart_base_ms
            )));
        }
        Ok(())
    }
}

fn default_governor_tick_ms() -> u64 {
    2_000
}
fn default_restart_base_ms() -> u64 {
    1_000
}
fn default_restart_ceiling_ms() -> u64 {
    300_000
}
fn default_stop_grace_ms() -> u64 {
    5_000
}
fn default_launch_timeout_ms() -> u64 {
    5_000
}
fn default_liveness_poll_ms() -> u64 {
    250
}
fn default_restart_log() -> String {
    "logs/restarts.log".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default = "default_sentinel_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_sentinel_log")]
    pub log_path: String,
    /// Number of typed health records kept in memory for the watchdog.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sentinel_interval_ms(),
            log_path: default_sentinel_log(),
            ring_capacity: default_ring_capacity(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl SentinelConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

fn default_sentinel_interval_ms() -> u64 {
    10_000
}
fn default_sentinel_log() -> String {
    "logs/sentinel.log".into()
}
fn default_ring_capacity() -> usize {
    1_024
}
fn default_query_timeout_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_interval_ms")]
    pub interval_ms: u64,
    /// How far back the watchdog looks for "not running" records.
    #[serde(default = "default_watchdog_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_watchdog_log")]
    pub log_path: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_watchdog_interval_ms(),
            window_ms: default_watchdog_window_ms(),
            log_path: default_watchdog_log(),
        }
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn default_watchdog_interval_ms() -> u64 {
    30_000
}
fn default_watchdog_window_ms() -> u64 {
    60_000
}
fn default_watchdog_log() -> String {
    "logs/watchdog.log".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_coordinator_tick_ms")]
    pub tick_ms: u64,
    /// Minimum number of running daemons before patches may execute.
    #[serde(default = "default_quorum")]
    pub quorum: usize,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Sentinel/watchdog activity older than this counts as unhealthy.
    #[serde(default = "default_health_window_ms")]
    pub health_window_ms: u64,
    #[serde(default = "default_patch_dir")]
    pub patch_dir: String,
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
    /// Failed executions allowed before a patch becomes terminally failed.
    #[serde(default = "default_max_patch_attempts")]
    pub max_patch_attempts: u32,
    /// Program invoked with the patch file path as its final argument.
    #[serde(default = "default_exec_program")]
    pub exec_program: String,
    #[serde(default)]
    pub exec_args: Vec<String>,
    #[serde(default = "default_coordinator_log")]
    pub log_path: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_coordinator_tick_ms(),
            quorum: default_quorum(),
            max_consecutive_errors: default_max_consecutive_errors(),
            health_window_ms: default_health_window_ms(),
            patch_dir: default_patch_dir(),
            exec_timeout_ms: default_exec_timeout_ms(),
            max_patch_attempts: default_max_patch_attempts(),
            exec_program: default_exec_program(),
            exec_args: Vec::new(),
            log_path: default_coordinator_log(),
        }
    }
}

impl CoordinatorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn health_window(&self) -> Duration {
        Duration::from_millis(self.health_window_ms)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_consecutive_errors == 0 {
            return Err(ConfigError::Validation(
                "coordinator.max_consecutive_errors must be > 0".to_string(),
            ));
        }
        if self.max_patch_attempts == 0 {
            return Err(ConfigError::Validation(
                "coordinator.max_patch_attempts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_coordinator_tick_ms() -> u64 {
    5_000
}
fn default_quorum() -> usize {
    1
}
fn default_max_consecutive_errors() -> u32 {
    5
}
fn default_health_window_ms() -> u64 {
    120_000
}
fn default_patch_dir() -> String {
    "patches".into()
}
fn default_exec_timeout_ms() -> u64 {
    300_000
}
fn default_max_patch_attempts() -> u32 {
    3
}
fn default_exec_program() -> String {
    "apply-patch".into()
}
fn default_coordinator_log() -> String {
    "logs/coordinator.log".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Case-insensitive allow-list of role/commit tags.
    #[serde(default = "default_allowed_roles")]
    pub allowed_roles: Vec<String>,
    #[serde(default = "default_summary_dir")]
    pub summary_dir: String,
    #[serde(default = "default_diff_interval_ms")]
    pub diff_interval_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            allowed_roles: default_allowed_roles(),
            summary_dir: default_summary_dir(),
            diff_interval_ms: default_diff_interval_ms(),
        }
    }
}

impl AdmissionConfig {
    pub fn diff_interval(&self) -> Duration {
        Duration::from_millis(self.diff_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_roles.iter().all(|r| r.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "admission.allowed_roles must contain at least one role".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_allowed_roles() -> Vec<String> {
    vec!["GPT".to_string(), "GHOST".to_string()]
}
fn default_summary_dir() -> String {
    "summaries".into()
}
fn default_diff_interval_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_signal_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_signal_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_signal_endpoint(),
            timeout_ms: default_signal_timeout_ms(),
        }
    }
}

impl SignalsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_true() -> bool {
    true
}
fn default_signal_endpoint() -> String {
    "http://127.0.0.1:8787/signal".into()
}
fn default_signal_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    9876
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

