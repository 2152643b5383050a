//! Backoff strategies for retry schedules

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for computing retry delays
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between attempts
    Fixed,

    /// Linear increase: delay = base_delay * attempt
    Linear,

    /// Exponential increase: delay = base_delay * factor^attempt
    Exponential {
        /// Multiplier applied per attempt (2.0 doubles the delay)
        factor: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential { factor: 2.0 }
    }
}

/// Computes capped retry delays for a sequence of attempts.
///
/// Attempt numbering is zero-based: attempt 0 is the delay before the
/// first retry. Jitter is off by default so schedules that are persisted
/// and compared (the dead-letter queue) stay deterministic.
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    strategy: BackoffStrategy,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffCalculator {
    pub fn new(strategy: BackoffStrategy, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy,
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    /// Exponential doubling with the given base and cap.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(
            BackoffStrategy::Exponential { factor: 2.0 },
            base_delay,
            max_delay,
        )
    }

    /// Enable ±20% jitter on computed delays.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay to wait before retry number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = match &self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential { factor } => {
                let multiplier = factor.powi(attempt.min(63) as i32);
                let nanos = self.base_delay.as_nanos() as f64 * multiplier;
                if nanos >= self.max_delay.as_nanos() as f64 {
                    self.max_delay
                } else {
                    Duration::from_nanos(nanos as u64)
                }
            }
        };

        let capped = raw.min(self.max_delay);
        if self.jitter {
            apply_jitter(capped)
        } else {
            capped
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let factor = rng.random_range(0.8..1.2);
    Duration::from_nanos((delay.as_nanos() as f64 * factor) as u64)
}
