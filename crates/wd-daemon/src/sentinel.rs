use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use wd_core::status_log::{format_line, StatusLog};
use wd_core::types::{DaemonSpec, HealthRecord, HealthSnapshot};

use crate::health_log::HealthLog;
use crate::inspector::ProcessInspector;

/// Periodic liveness sampler.
///
/// Each pass queries every daemon once, appends one line per daemon to the
/// sentinel status log and stores the typed records in the [`HealthLog`].
pub struct Sentinel {
    inspector: Arc<dyn ProcessInspector>,
    log: StatusLog,
}

impl Sentinel {
    pub fn new(inspector: Arc<dyn ProcessInspector>, log: StatusLog) -> Self {
        Self { inspector, log }
    }

    pub fn log(&self) -> &StatusLog {
        &self.log
    }

    pub async fn check<'a, I>(&self, specs: I, health: &mut HealthLog) -> HealthSnapshot
    where
        I: IntoIterator<Item = &'a DaemonSpec>,
    {
        let at = Utc::now();
        let mut records = Vec::new();
        for spec in specs {
            let live = self.inspector.is_alive(spec).await;
            records.push(HealthRecord {
                daemon: spec.name.clone(),
                alive: live.alive,
                pid: live.pid,
                at,
                error: live.error,
            });
        }
        let snapshot = HealthSnapshot { at, records };

        let lines: Vec<String> = snapshot
            .records
            .iter()
            .map(|r| format_line(at, &describe(r)))
            .collect();
        if let Err(e) = self.log.append_lines(&lines).await {
            warn!(error = %e, "failed to write sentinel log");
        }

        health.record_snapshot(&snapshot);
        debug!(
            daemons = snapshot.records.len(),
            alive = snapshot.alive_count(),
            "sentinel check complete"
        );
        snapshot
    }
}

fn describe(record: &HealthRecord) -> String {
    match (record.alive, record.pid, &record.error) {
        (true, Some(pid), _) => format!("sentinel {}: running (pid {pid})", record.daemon),
        (true, None, _) => format!("sentinel {}: running", record.daemon),
        (false, _, Some(err)) => format!("sentinel {}: not running ({err})", record.daemon),
        (false, _, None) => format!("sentinel {}: not running", record.daemon),
    }
}
