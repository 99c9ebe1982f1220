use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use wd_core::status_log::StatusLog;
use wd_core::types::RestartOutcome;

use crate::governor::{Governor, RestartSource};
use crate::health_log::HealthLog;

/// What one watchdog scan found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogReport {
    pub records_scanned: usize,
    /// Daemons whose newest record in the window was "not running", with
    /// the outcome of the restart request.
    pub restarts: Vec<(String, RestartOutcome)>,
}

/// Looks back over recent sentinel records and asks the governor to restart
/// anything reported as not running.
///
/// Each record is considered by at most one scan, and the governor applies
/// the shared cool-down, so repeated scans never double-restart a daemon.
pub struct Watchdog {
    window: Duration,
    log: StatusLog,
    /// Highest health-record sequence number already acted on.
    last_seq: u64,
}

impl Watchdog {
    pub fn new(window: Duration, log: StatusLog) -> Self {
        Self {
            window,
            log,
            last_seq: 0,
        }
    }

    pub fn log(&self) -> &StatusLog {
        &self.log
    }

    pub async fn scan(&mut self, health: &mut HealthLog, governor: &mut Governor) -> WatchdogReport {
        // Newest verdict per daemon wins; a later "running" clears an earlier miss.
        let mut latest: BTreeMap<String, bool> = BTreeMap::new();
        let mut records_scanned = 0;
        for (seq, record) in health.recent(self.last_seq, self.window) {
            records_scanned += 1;
            self.last_seq = self.last_seq.max(seq);
            latest.insert(record.daemon.clone(), record.alive);
        }

        let mut report = WatchdogReport {
            records_scanned,
            restarts: Vec::new(),
        };
        for (name, alive) in latest {
            if alive {
                continue;
            }
            match governor.request_restart(&name, RestartSource::Watchdog).await {
                Ok(outcome) => {
                    info!(daemon = %name, %outcome, "watchdog restart requested");
                    report.restarts.push((name, outcome));
                }
                Err(e) => warn!(daemon = %name, error = %e, "watchdog restart refused"),
            }
        }

        let at = Utc::now();
        health.mark_watchdog_scan(at);
        if let Err(e) = self.log.append_at(at, &summarize(&report)).await {
            warn!(error = %e, "failed to write watchdog log");
        }
        report
    }
}

fn summarize(report: &WatchdogReport) -> String {
    if report.restarts.is_empty() {
        return format!(
            "watchdog: scanned {} records, all daemons running",
            report.records_scanned
        );
    }
    let actions: Vec<String> = report
        .restarts
        .iter()
        .map(|(name, outcome)| format!("{name} not running -> {outcome}"))
        .collect();
    format!(
        "watchdog: scanned {} records; {}",
        report.records_scanned,
        actions.join("; ")
    )
}
