//! Retry budget and exponential backoff with jitter.
//!
//! [`RetryConfig`] describes the budget; [`Backoff`] hands out the delay to
//! sleep before each retry. The probe loop owns the sleeping so that it can
//! race each delay against cancellation and the overall deadline.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Budget for operations that may fail transiently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Default backoff curve with a different attempt budget.
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Fixed delay between attempts, no jitter. Mostly useful in tests.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "retry budget must allow at least one attempt".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::InvalidConfig(format!(
                "initial delay {:?} exceeds max delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay,
            max: self.max_delay,
            multiplier: self.backoff_multiplier,
            jitter: self.jitter,
        }
    }
}

/// Sequence of retry delays for one operation.
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Delay before the next retry. Advances the curve.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = Duration::from_secs_f64(
            (base.as_secs_f64() * self.multiplier).min(self.max.as_secs_f64()),
        );

        if !self.jitter {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }
}
