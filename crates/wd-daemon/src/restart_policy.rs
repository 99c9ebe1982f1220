//! Exponential cool-down shared by every restart path.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use wd_core::config::GovernorConfig;

/// Per-daemon cool-down clocks.
///
/// Cool-down after `n` recorded failures is `base * 2^(n-1)`, capped at
/// `ceiling`, measured from the daemon's last restart attempt. The governor
/// owns the only instance; the watchdog goes through the governor.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    base: Duration,
    ceiling: Duration,
    last_attempt: HashMap<String, Instant>,
}

impl RestartPolicy {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            last_attempt: HashMap::new(),
        }
    }

    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(config.restart_base(), config.restart_ceiling())
    }

    /// Cool-down owed after `restart_count` failures.
    pub fn cool_down(&self, restart_count: u32) -> Duration {
        if restart_count == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(restart_count - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.ceiling, |d| d.min(self.ceiling))
    }

    /// Time left before `name` may restart, or `None` when it may go now.
    pub fn remaining(&self, name: &str, restart_count: u32, now: Instant) -> Option<Duration> {
        let last = self.last_attempt.get(name)?;
        let ready_at = *last + self.cool_down(restart_count);
        (ready_at > now).then(|| ready_at - now)
    }

    pub fn record_attempt(&mut self, name: &str, at: Instant) {
        self.last_attempt.insert(name.to_string(), at);
    }

    pub fn last_attempt(&self, name: &str) -> Option<Instant> {
        self.last_attempt.get(name).copied()
    }

    pub fn reset(&mut self, name: &str) {
        self.last_attempt.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RestartPolicy {
        RestartPolicy::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn cool_down_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.cool_down(0), Duration::ZERO);
        assert_eq!(p.cool_down(1), Duration::from_secs(1));
        assert_eq!(p.cool_down(2), Duration::from_secs(2));
        assert_eq!(p.cool_down(3), Duration::from_secs(4));
        assert_eq!(p.cool_down(7), Duration::from_secs(60));
        assert_eq!(p.cool_down(40), Duration::from_secs(60));
        assert_eq!(p.cool_down(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn cool_down_is_monotonic() {
        let p = policy();
        let mut prev = Duration::ZERO;
        for n in 0..64 {
            let next = p.cool_down(n);
            assert!(next >= prev, "cool_down({n}) decreased");
            assert!(next <= Duration::from_secs(60));
            prev = next;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_from_last_attempt() {
        let mut p = policy();
        let now = Instant::now();
        assert_eq!(p.remaining("relay", 2, now), None);

        p.record_attempt("relay", now);
        assert_eq!(p.remaining("relay", 2, now), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(
            p.remaining("relay", 2, Instant::now()),
            Some(Duration::from_millis(500))
        );

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(p.remaining("relay", 2, Instant::now()), None);

        p.reset("relay");
        assert!(p.last_attempt("relay").is_none());
    }
}
