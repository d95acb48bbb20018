use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a failed endpoint is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconnectPolicy {
    /// Fixed delay between attempts, gives up after `max_attempts` consecutive retries
    Bounded { delay: Duration, max_attempts: u32 },
    /// Fixed delay between attempts, never gives up
    Unbounded { delay: Duration },
}

/// Outcome of recording a failure against a [`ReconnectState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

impl ReconnectPolicy {
    /// Outward dial policy: 5s between attempts, at most 10 retries
    pub fn dial() -> Self {
        ReconnectPolicy::Bounded {
            delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }

    /// Serial recovery policy: retry every second, forever
    pub fn serial() -> Self {
        ReconnectPolicy::Unbounded {
            delay: Duration::from_secs(1),
        }
    }

    pub fn delay(&self) -> Duration {
        match self {
            ReconnectPolicy::Bounded { delay, .. } | ReconnectPolicy::Unbounded { delay } => *delay,
        }
    }

    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            ReconnectPolicy::Bounded { max_attempts, .. } => Some(*max_attempts),
            ReconnectPolicy::Unbounded { .. } => None,
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        match self {
            ReconnectPolicy::Bounded { max_attempts, .. } => ReconnectPolicy::Bounded {
                delay,
                max_attempts,
            },
            ReconnectPolicy::Unbounded { .. } => ReconnectPolicy::Unbounded { delay },
        }
    }
}

/// Consecutive-failure counter for one endpoint
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    failures: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Consecutive failures since the last successful open
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt. Once a bounded policy has retried
    /// `max_attempts` times the next failure yields [`RetryDecision::GiveUp`].
    pub fn record_failure(&mut self) -> RetryDecision {
        if let Some(max) = self.policy.max_attempts() {
            if self.failures >= max {
                return RetryDecision::GiveUp;
            }
        }
        self.failures = self.failures.saturating_add(1);
        RetryDecision::RetryAfter(self.policy.delay())
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }
}
