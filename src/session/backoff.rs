//! Attempt counter shared by every retry loop in the session

use std::time::Duration;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Retry `n` waits `base * n`
    Linear,
    /// Every retry waits `base`
    Fixed,
}

/// Bounded retry state.
///
/// `attempts` counts retries handed out since the last [`Backoff::reset`];
/// once it reaches `max_attempts` no further delay is produced.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
    schedule: Schedule,
}

impl Backoff {
    pub fn linear(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            base_delay,
            schedule: Schedule::Linear,
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            base_delay: delay,
            schedule: Schedule::Fixed,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Count one more retry and return how long to wait before it.
    ///
    /// Returns `None` once the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(match self.schedule {
            Schedule::Linear => self.base_delay.saturating_mul(self.attempts),
            Schedule::Fixed => self.base_delay,
        })
    }
}
