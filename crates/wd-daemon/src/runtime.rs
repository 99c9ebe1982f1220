//! The single-owner event loop.
//!
//! Every component lives inside [`Runtime`] and is only touched from
//! [`Runtime::run`], one tick at a time. The HTTP API and anything else
//! outside the loop see state through `watch` snapshots.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use wd_core::config::Config;
use wd_core::file_watcher::CreationWatcher;
use wd_core::status_log::StatusLog;
use wd_core::types::HealthView;
use wd_harness::shutdown::ShutdownSignal;
use wd_harness::ticker::Ticker;

use crate::admission::{AdmissionGate, DiffMonitor, RoleVerifier, SummarySync};
use crate::coordinator::{Coordinator, CoordinatorSettings, TickOutcome};
use crate::governor::Governor;
use crate::health_log::HealthLog;
use crate::inspector::{ProcTableInspector, ProcessInspector};
use crate::invoker::{CommandInvoker, PatchInvoker};
use crate::launcher::{CommandLauncher, DaemonLauncher};
use crate::patch_store::PatchStore;
use crate::sentinel::Sentinel;
use crate::signal_bus::SignalBus;
use crate::status_api::StatusState;
use crate::watchdog::Watchdog;

/// How often the summary directory's watcher queue is drained.
const SUMMARY_POLL: Duration = Duration::from_secs(1);

/// The pieces that talk to the outside world.
pub struct RuntimeParts {
    pub inspector: Arc<dyn ProcessInspector>,
    pub launcher: Arc<dyn DaemonLauncher>,
    pub invoker: Arc<dyn PatchInvoker>,
    pub signals: SignalBus,
}

impl RuntimeParts {
    /// `/proc` inspection, real process launch, the configured patch
    /// executor and the HTTP signal relay.
    pub fn production(config: &Config) -> Self {
        Self {
            inspector: Arc::new(ProcTableInspector::new(config.sentinel.query_timeout())),
            launcher: Arc::new(CommandLauncher::new()),
            invoker: Arc::new(CommandInvoker::new(
                config.coordinator.exec_program.clone(),
                config.coordinator.exec_args.clone(),
            )),
            signals: SignalBus::new(&config.signals),
        }
    }
}

/// One tick source per loop.
pub struct Tickers {
    pub governor: Ticker,
    pub sentinel: Ticker,
    pub watchdog: Ticker,
    pub coordinator: Ticker,
    pub diff: Ticker,
    pub summaries: Ticker,
}

impl Tickers {
    pub fn from_config(config: &Config, shutdown: &ShutdownSignal) -> Self {
        Self {
            governor: Ticker::every("governor", config.governor.tick(), shutdown),
            sentinel: Ticker::every("sentinel", config.sentinel.interval(), shutdown),
            watchdog: Ticker::every("watchdog", config.watchdog.interval(), shutdown),
            coordinator: Ticker::every("coordinator", config.coordinator.tick(), shutdown),
            diff: Ticker::every("diff", config.admission.diff_interval(), shutdown),
            summaries: Ticker::every("summaries", SUMMARY_POLL, shutdown),
        }
    }
}

pub struct Runtime {
    governor: Governor,
    sentinel: Sentinel,
    watchdog: Watchdog,
    health: HealthLog,
    health_window: Duration,
    coordinator: Coordinator,
    diff: DiffMonitor,
    summaries: SummarySync,
    summary_watcher: Option<CreationWatcher>,
    signals: SignalBus,
    health_tx: watch::Sender<HealthView>,
    exec_timeout: Duration,
}

impl Runtime {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config, RuntimeParts::production(config))
    }

    /// Fails on an invalid daemon graph, before anything is launched.
    pub fn new(config: &Config, parts: RuntimeParts) -> Result<Self> {
        let governor = Governor::new(
            config.daemons.clone(),
            &config.governor,
            Arc::clone(&parts.inspector),
            parts.launcher,
            parts.signals.clone(),
        )
        .context("invalid daemon configuration")?
        .with_restart_log(StatusLog::new(config.resolve(&config.governor.restart_log)));

        let sentinel = Sentinel::new(
            parts.inspector,
            StatusLog::new(config.resolve(&config.sentinel.log_path)),
        );
        let watchdog = Watchdog::new(
            config.watchdog.window(),
            StatusLog::new(config.resolve(&config.watchdog.log_path)),
        );

        let store = PatchStore::new(config.resolve(&config.coordinator.patch_dir));
        let gate = AdmissionGate::new(RoleVerifier::new(&config.admission.allowed_roles));
        let coordinator = Coordinator::new(
            CoordinatorSettings::from_config(&config.coordinator),
            store.clone(),
            gate,
            parts.invoker,
            parts.signals.clone(),
        )
        .with_log(StatusLog::new(config.resolve(&config.coordinator.log_path)));

        let summary_dir = config.resolve(&config.admission.summary_dir);
        let summary_watcher = watch_summaries(&summary_dir);
        let diff = DiffMonitor::new(store.clone(), summary_dir);

        let health = HealthLog::new(config.sentinel.ring_capacity);
        let health_window = config.coordinator.health_window();
        let (health_tx, _) = watch::channel(health.view(health_window, 0));

        Ok(Self {
            governor,
            sentinel,
            watchdog,
            health,
            health_window,
            coordinator,
            diff,
            summaries: SummarySync::new(store),
            summary_watcher,
            signals: parts.signals,
            health_tx,
            exec_timeout: config.coordinator.exec_timeout(),
        })
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    /// Receivers for the status API.
    pub fn status_state(&self) -> StatusState {
        StatusState {
            governor: self.governor.subscribe(),
            coordinator: self.coordinator.subscribe(),
            health: self.health_tx.subscribe(),
        }
    }

    pub fn health_view(&self) -> HealthView {
        self.health
            .view(self.health_window, self.governor.running_count())
    }

    // ------------------------------------------------------------------
    // Individual passes
    // ------------------------------------------------------------------

    pub async fn governor_pass(&mut self) {
        self.governor.govern_tick().await;
        self.publish_health();
    }

    pub async fn sentinel_pass(&mut self) {
        let snapshot = self
            .sentinel
            .check(self.governor.specs(), &mut self.health)
            .await;
        debug!(alive = snapshot.alive_count(), total = snapshot.records.len(), "sentinel pass");
        self.publish_health();
    }

    pub async fn watchdog_pass(&mut self) {
        let report = self.watchdog.scan(&mut self.health, &mut self.governor).await;
        if !report.restarts.is_empty() {
            info!(restarts = report.restarts.len(), "watchdog requested restarts");
        }
        self.publish_health();
    }

    pub async fn coordinator_pass(&mut self) -> TickOutcome {
        let view = self.health_view();
        self.coordinator.tick(&view).await
    }

    pub async fn diff_pass(&mut self) {
        if let Err(e) = self.diff.check(&self.signals).await {
            warn!(error = %e, "diff monitor check failed");
        }
    }

    pub async fn summary_pass(&mut self) {
        let Some(watcher) = self.summary_watcher.as_mut() else {
            return;
        };
        for path in watcher.drain_created() {
            match self.summaries.sync_file(&path, &self.signals).await {
                Ok(Some(verdict)) => {
                    debug!(patch = %verdict.patch_id, passed = verdict.passed, "summary recorded")
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "summary sync failed"),
            }
        }
    }

    fn publish_health(&self) {
        self.health_tx.send_replace(self.health_view());
    }

    // ------------------------------------------------------------------
    // Loop
    // ------------------------------------------------------------------

    /// Run with tick periods from `config` until `shutdown` fires.
    pub async fn run(self, config: &Config, shutdown: ShutdownSignal) {
        let tickers = Tickers::from_config(config, &shutdown);
        self.run_with(tickers, shutdown).await;
    }

    pub async fn run_with(mut self, mut tickers: Tickers, shutdown: ShutdownSignal) {
        info!(order = ?self.governor.startup_order(), "runtime starting");
        self.governor_pass().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(done) = self.coordinator.next_completion() => {
                    self.coordinator.finish(done).await;
                }
                Some(_) = tickers.governor.tick() => self.governor_pass().await,
                Some(_) = tickers.sentinel.tick() => self.sentinel_pass().await,
                Some(_) = tickers.watchdog.tick() => self.watchdog_pass().await,
                Some(_) = tickers.coordinator.tick() => {
                    self.coordinator_pass().await;
                }
                Some(_) = tickers.diff.tick() => self.diff_pass().await,
                Some(_) = tickers.summaries.tick() => self.summary_pass().await,
                else => break,
            }
        }

        self.shutdown().await;
    }

    /// Let an in-flight patch finish, then stop every daemon.
    pub async fn shutdown(&mut self) {
        if self.coordinator.state().is_processing {
            info!("waiting for in-flight patch before shutdown");
            match tokio::time::timeout(self.exec_timeout, self.coordinator.next_completion()).await {
                Ok(Some(done)) => {
                    self.coordinator.finish(done).await;
                }
                Ok(None) | Err(_) => warn!("in-flight patch did not report back before shutdown"),
            }
        }

        for err in self.governor.shutdown_all().await {
            warn!(error = %err, "daemon did not stop cleanly");
        }
        self.publish_health();
        info!("runtime stopped");
    }
}

fn watch_summaries(dir: &std::path::Path) -> Option<CreationWatcher> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "cannot create summary directory, summary sync disabled");
        return None;
    }
    match CreationWatcher::new(dir, &["md", "txt"]) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot watch summary directory, summary sync disabled");
            None
        }
    }
}
