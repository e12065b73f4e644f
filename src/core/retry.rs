//! Retry policy configuration for tasks.
//!
//! A task carries one retry budget shared by all of its groups. Delays
//! between attempts are either fixed or grow exponentially up to a cap.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of group re-runs for the whole task (0 = no retries).
    /// `max_retries = 3` allows three re-runs on top of every initial run.
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "serde_millis")]
    pub delay: Duration,

    /// How the delay evolves between retries.
    pub backoff: Backoff,
}

/// Delay progression between retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    #[default]
    Fixed,

    /// Delay multiplied by `multiplier` after each retry, never above `max_delay`.
    Exponential {
        multiplier: f64,
        #[serde(with = "serde_millis")]
        max_delay: Duration,
    },
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }

    /// Create a policy with fixed delay retries.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: Backoff::Fixed,
        }
    }

    /// Create a policy whose delay doubles after every retry, capped at `max_delay`.
    pub fn exponential(max_retries: u32, initial: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            delay: initial,
            backoff: Backoff::Exponential {
                multiplier: 2.0,
                max_delay,
            },
        }
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Check whether another retry fits in the budget.
    ///
    /// # Arguments
    /// * `retries_used` - Retries already spent by the task
    pub fn should_retry(&self, retries_used: u32) -> bool {
        retries_used < self.max_retries
    }

    /// Delay before the given retry (1-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = retry.saturating_sub(1).min(32) as i32;
                let scaled = self.delay.as_secs_f64() * multiplier.max(1.0).powi(exponent);
                if !scaled.is_finite() || scaled >= max_delay.as_secs_f64() {
                    max_delay
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}

/// Serde helper for Duration serialization as milliseconds.
mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
