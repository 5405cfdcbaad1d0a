//! Heartbeat retry policy

use std::time::Duration;

/// Timing and retry bounds for the heartbeat loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    /// Delay between two heartbeats while the registry answers
    pub update_interval: Duration,
    /// Delay before retrying after a failed heartbeat
    pub retry_interval: Duration,
    /// Consecutive failures after which the registration is considered lost
    pub max_failures: u32,
    /// Timeout for a single control-plane request
    pub request_timeout: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(3),
            max_failures: 6,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl HeartbeatPolicy {
    /// Delay before the next heartbeat given the current run of failures
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            self.update_interval
        } else {
            self.retry_interval
        }
    }

    /// Whether this many consecutive failures ends the heartbeat
    pub fn is_exhausted(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.max_failures
    }
}

/// Run of consecutive heartbeat failures.
///
/// Only a success resets the run, so the retry bound holds across attempts.
#[derive(Debug, Default)]
pub struct FailureCounter {
    consecutive: u32,
}

impl FailureCounter {
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure and report whether `policy` now gives up
    pub fn record_failure(&mut self, policy: &HeartbeatPolicy) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        policy.is_exhausted(self.consecutive)
    }
}
