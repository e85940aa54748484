//! Rotation timer
//!
//! A periodic deadline owned by the scheduler. Arming an armed timer is a
//! no-op, so repeated ready events never stack a second timer; firing moves the
//! deadline forward by whole periods, keeping the original cadence.

use std::time::Duration;
use tokio::time::Instant;

/// Periodic rotation deadline with explicit arm/disarm
#[derive(Debug, Clone)]
pub struct RotationTimer {
    period: Duration,
    deadline: Option<Instant>,
}

impl RotationTimer {
    /// Create a disarmed timer; a zero period is raised to one millisecond
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            deadline: None,
        }
    }

    /// Period between fires
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Arm relative to `now`; returns `false` if already armed
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.period);
        true
    }

    /// Disarm; returns whether the timer was armed
    pub fn disarm(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Whether a deadline is set
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Next fire instant
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Record a fire at `now` and schedule the next one
    ///
    /// Periods missed entirely (a stalled loop) are skipped, not replayed.
    pub fn fire(&mut self, now: Instant) {
        let Some(mut next) = self.deadline else {
            return;
        };
        while next <= now {
            next += self.period;
        }
        self.deadline = Some(next);
    }
}
