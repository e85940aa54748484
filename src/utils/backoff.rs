//! Reconnect backoff
//!
//! Delay calculation for reconnect attempts. Unlike a bounded retry helper the
//! scheduler never gives up: it asks for the delay of attempt `n` and keeps
//! going, so this type only does the arithmetic.

use std::time::Duration;

/// Exponential backoff with a cap; a multiplier of 1.0 gives a fixed delay
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first attempt, in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier per consecutive failure (default: 2.0)
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 10_000,
            max_delay_ms: 300_000,
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Create a backoff with custom delays
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            multiplier: if multiplier.is_finite() {
                multiplier.max(1.0)
            } else {
                1.0
            },
        }
    }

    /// Fixed delay, no growth
    pub fn fixed(delay_ms: u64) -> Self {
        Self::new(delay_ms, delay_ms, 1.0)
    }

    /// Delay before attempt number `attempt` (1-based; 0 means no delay)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            let exponent = (attempt - 1).min(63) as i32;
            let exponential = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
            if exponential >= self.max_delay_ms as f64 {
                self.max_delay_ms
            } else {
                exponential as u64
            }
        };

        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_for() {
        let backoff = Backoff::new(1000, 30_000, 2.0);

        assert_eq!(backoff.delay_for(0), Duration::from_millis(0));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_max_delay_cap() {
        let backoff = Backoff::new(1000, 5000, 2.0);

        assert_eq!(backoff.delay_for(10), Duration::from_millis(5000));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_fixed_delay() {
        let backoff = Backoff::fixed(2500);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(2500));
        assert_eq!(backoff.delay_for(7), Duration::from_millis(2500));
    }

    #[test]
    fn test_new_sanitizes_inputs() {
        let backoff = Backoff::new(2000, 500, 0.1);
        assert_eq!(backoff.max_delay_ms, 2000);
        assert_eq!(backoff.multiplier, 1.0);
    }
}
