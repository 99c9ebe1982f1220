//! Tick sources for the runtime loops.
//!
//! A [`Ticker`] either follows a fixed period or fires only when its
//! [`ManualTick`] handle is poked. Both kinds stop yielding once the shared
//! [`ShutdownSignal`] is triggered, which is how every loop is cancelled.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

use crate::shutdown::ShutdownSignal;

enum Source {
    Periodic(Interval),
    Manual(mpsc::UnboundedReceiver<()>),
}

pub struct Ticker {
    name: &'static str,
    source: Source,
    signal: ShutdownSignal,
    count: u64,
    done: bool,
}

/// Handle that fires a manual [`Ticker`].
#[derive(Debug, Clone)]
pub struct ManualTick {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTick {
    /// Queue one tick. Returns `false` once the ticker has been dropped.
    pub fn fire(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

impl Ticker {
    /// Tick every `period`. The first tick lands one period from now, so
    /// loops sharing a start time do not all fire at t=0.
    pub fn every(name: &'static str, period: Duration, signal: &ShutdownSignal) -> Self {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        // A slow tick pushes the schedule back instead of bursting to catch up.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self::with_source(name, Source::Periodic(interval), signal)
    }

    /// Tick only when the returned handle fires.
    pub fn manual(name: &'static str, signal: &ShutdownSignal) -> (Self, ManualTick) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self::with_source(name, Source::Manual(rx), signal),
            ManualTick { tx },
        )
    }

    fn with_source(name: &'static str, source: Source, signal: &ShutdownSignal) -> Self {
        Self {
            name,
            source,
            signal: signal.clone(),
            count: 0,
            done: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ticks delivered so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_cancelled(&self) -> bool {
        self.done
    }

    /// Wait for the next tick. Returns its sequence number, or `None` once
    /// shutdown has been triggered or the manual handle is gone.
    pub async fn tick(&mut self) -> Option<u64> {
        if self.done || self.signal.is_shutting_down() {
            self.done = true;
            return None;
        }

        let Self { source, signal, .. } = self;
        let fired = match source {
            Source::Periodic(interval) => tokio::select! {
                biased;
                _ = signal.cancelled() => false,
                _ = interval.tick() => true,
            },
            Source::Manual(rx) => tokio::select! {
                biased;
                _ = signal.cancelled() => false,
                msg = rx.recv() => msg.is_some(),
            },
        };

        if fired {
            self.count += 1;
            tracing::trace!(ticker = self.name, tick = self.count, "tick");
            Some(self.count)
        } else {
            self.done = true;
            tracing::debug!(ticker = self.name, "ticker stopped");
            None
        }
    }
}
