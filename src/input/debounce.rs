use super::ButtonId;
use std::time::Duration;
use tokio::time::Instant;

/// Per-button minimum interval between accepted actuations.
///
/// Contact bounce produces bursts of edges. An edge of either direction
/// arriving sooner than `min_interval` after the last accepted edge of the
/// same button is discarded.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_accepted: [Option<Instant>; 4],
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: [None; 4],
        }
    }

    /// Returns whether the signal is accepted, recording it if so.
    pub fn accept(&mut self, button: ButtonId, now: Instant) -> bool {
        let slot = &mut self.last_accepted[button.index()];

        if slot.is_some_and(|last| now.saturating_duration_since(last) < self.min_interval) {
            return false;
        }

        *slot = Some(now);
        true
    }

    /// Earliest instant at which `button` accepts its next edge
    pub fn ready_at(&self, button: ButtonId) -> Option<Instant> {
        self.last_accepted[button.index()].map(|last| last + self.min_interval)
    }
}
