//! Process-wide per-device command spacing (C3 in the design notes).
//!
//! Every command sent to a unit must start transmission at least
//! [`RateGovernor::MIN_INTERVAL`] after the previous one. Callers acquire
//! this *after* the device mutex table lock, so concurrent acquisitions for
//! the same `unit_id` never actually race — C4 already serializes them.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

pub struct RateGovernor {
    last_sent: DashMap<String, Instant>,
    min_interval: Duration,
}

impl RateGovernor {
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1000);

    pub fn new() -> Self {
        RateGovernor {
            last_sent: DashMap::new(),
            min_interval: Self::MIN_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_min_interval(min_interval: Duration) -> Self {
        RateGovernor {
            last_sent: DashMap::new(),
            min_interval,
        }
    }

    /// Sleep until it is safe to send the next command to `unit_id`, then
    /// record the new send time. If the calling future is dropped while
    /// sleeping, the record is never advanced.
    pub async fn acquire(&self, unit_id: &str) {
        let now = Instant::now();
        let wait = self
            .last_sent
            .get(unit_id)
            .map(|last| self.min_interval.saturating_sub(now.duration_since(*last)))
            .unwrap_or(Duration::ZERO);

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        self.last_sent.insert(unit_id.to_owned(), Instant::now());
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new()
    }
}
