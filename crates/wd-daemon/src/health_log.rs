//! In-memory ring of typed health records shared by the monitors.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use wd_core::types::{HealthRecord, HealthSnapshot, HealthView};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    at: Instant,
    record: HealthRecord,
}

/// Bounded history of sentinel samples plus the last time each monitor ran.
///
/// Entries carry a monotonic stamp next to the wall-clock one so window
/// queries are immune to clock changes.
#[derive(Debug, Clone)]
pub struct HealthLog {
    capacity: usize,
    next_seq: u64,
    records: VecDeque<Entry>,
    last_sentinel: Option<(Instant, DateTime<Utc>)>,
    last_watchdog: Option<(Instant, DateTime<Utc>)>,
}

impl HealthLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: 0,
            records: VecDeque::new(),
            last_sentinel: None,
            last_watchdog: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store one sentinel pass.
    pub fn record_snapshot(&mut self, snapshot: &HealthSnapshot) {
        let now = Instant::now();
        for record in &snapshot.records {
            if self.records.len() == self.capacity {
                self.records.pop_front();
            }
            self.next_seq += 1;
            self.records.push_back(Entry {
                seq: self.next_seq,
                at: now,
                record: record.clone(),
            });
        }
        self.last_sentinel = Some((now, snapshot.at));
    }

    pub fn mark_watchdog_scan(&mut self, at: DateTime<Utc>) {
        self.last_watchdog = Some((Instant::now(), at));
    }

    pub fn last_sentinel_check(&self) -> Option<DateTime<Utc>> {
        self.last_sentinel.map(|(_, at)| at)
    }

    pub fn last_watchdog_check(&self) -> Option<DateTime<Utc>> {
        self.last_watchdog.map(|(_, at)| at)
    }

    /// Records younger than `window` with a sequence number above
    /// `after`, oldest first. Sequence numbers start at 1.
    pub fn recent(
        &self,
        after: u64,
        window: Duration,
    ) -> impl Iterator<Item = (u64, &HealthRecord)> {
        self.records
            .iter()
            .filter(move |e| e.seq > after && e.at.elapsed() <= window)
            .map(|e| (e.seq, &e.record))
    }

    /// The newest record for `daemon`.
    pub fn latest(&self, daemon: &str) -> Option<&HealthRecord> {
        self.records
            .iter()
            .rev()
            .map(|e| &e.record)
            .find(|r| r.daemon == daemon)
    }

    /// Aggregate health: a monitor is healthy when it has run within
    /// `window`. `daemon_count` comes from the governor.
    pub fn view(&self, window: Duration, daemon_count: usize) -> HealthView {
        let fresh = |stamp: Option<(Instant, DateTime<Utc>)>| {
            stamp.is_some_and(|(at, _)| at.elapsed() <= window)
        };
        HealthView {
            sentinel_healthy: fresh(self.last_sentinel),
            watchdog_healthy: fresh(self.last_watchdog),
            daemon_count,
            last_sentinel_check: self.last_sentinel_check(),
            last_watchdog_check: self.last_watchdog_check(),
        }
    }
}
