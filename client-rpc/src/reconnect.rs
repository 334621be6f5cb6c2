//! Reconnect delays for the client link supervisor.
//!
//! Retries are unbounded: the supervisor asks the schedule for the next delay
//! after every closed or failed session and never gives up.

use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Wait the same delay before every attempt.
    Fixed(Duration),
    /// Start at `initial`, double after each failure, never exceed `max`.
    Backoff { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    #[must_use]
    pub fn schedule(self) -> ReconnectSchedule {
        ReconnectSchedule { policy: self, next: self.first_delay() }
    }

    fn first_delay(self) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Backoff { initial, max } => initial.min(max),
        }
    }
}

/// Stateful iterator over reconnect delays.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    policy: ReconnectPolicy,
    next: Duration,
}

impl ReconnectSchedule {
    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        if let ReconnectPolicy::Backoff { max, .. } = self.policy {
            self.next = delay.saturating_mul(2).min(max);
        }
        delay
    }

    /// Start over after a session was established.
    pub fn reset(&mut self) {
        self.next = self.policy.first_delay();
    }
}

#[cfg(test)]
#[path = "reconnect_test.rs"]
mod tests;
