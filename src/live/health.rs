use std::time::Duration;

/// Result of one attempt at a chunk of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Every request in the attempt produced an answer.
    Success,
    /// At least one request failed and must be retried.
    Failure,
}

/// Restart state of one analyzer connection.
///
/// Transitions are pure so retry policy can be tested without processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionHealth {
    #[default]
    Healthy,
    /// `attempt` consecutive failed attempts so far.
    Degraded { attempt: u32 },
    /// Out of attempts; remaining work resolves to empty results.
    Dead,
}

impl ConnectionHealth {
    /// The state after an attempt with the given outcome.
    ///
    /// With `max_attempts = 3`, two failures leave the connection degraded
    /// and a third marks it dead. A success always restores health.
    pub fn next(self, outcome: AttemptOutcome, max_attempts: u32) -> Self {
        match (self, outcome) {
            (ConnectionHealth::Dead, _) => ConnectionHealth::Dead,
            (_, AttemptOutcome::Success) => ConnectionHealth::Healthy,
            (ConnectionHealth::Healthy, AttemptOutcome::Failure) => {
                Self::after_failures(1, max_attempts)
            }
            (ConnectionHealth::Degraded { attempt }, AttemptOutcome::Failure) => {
                Self::after_failures(attempt + 1, max_attempts)
            }
        }
    }

    fn after_failures(failures: u32, max_attempts: u32) -> Self {
        if failures >= max_attempts {
            ConnectionHealth::Dead
        } else {
            ConnectionHealth::Degraded { attempt: failures }
        }
    }

    /// Number of failed attempts behind this state; used to scale timeouts.
    pub fn failed_attempts(&self) -> u32 {
        match self {
            ConnectionHealth::Healthy => 0,
            ConnectionHealth::Degraded { attempt } => *attempt,
            ConnectionHealth::Dead => 0,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, ConnectionHealth::Dead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionHealth::Healthy => "healthy",
            ConnectionHealth::Degraded { .. } => "degraded",
            ConnectionHealth::Dead => "dead",
        }
    }
}

/// Delay before restarting after `attempt` failures: `base * 2^(attempt-1)`,
/// capped at 30 seconds.
pub fn restart_backoff(base: Duration, attempt: u32) -> Duration {
    if attempt == 0 || base.is_zero() {
        return Duration::ZERO;
    }
    let factor = 1u32 << (attempt - 1).min(10);
    base.saturating_mul(factor).min(Duration::from_secs(30))
}
