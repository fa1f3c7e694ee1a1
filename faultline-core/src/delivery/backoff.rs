//! Retry delay calculation

use std::time::Duration;

use crate::config::DeliveryConfig;

/// Exponential backoff: `base * 2^retry`, capped, with optional jitter.
///
/// Jitter scales the delay by a random factor in `[0.5, 1.5)` and the result
/// is capped again, so no delay ever exceeds `cap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Fixed delays with no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            cap: delay,
            jitter: false,
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            base: config.backoff_base(),
            cap: config.backoff_cap(),
            jitter: true,
        }
    }

    /// Delay before the attempt that follows `retry` earlier retries.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2f64.powi(retry.min(32) as i32);
        let exponential = self.base.as_secs_f64() * factor;
        let capped = exponential.min(self.cap.as_secs_f64());

        let delay = if self.jitter {
            (capped * (0.5 + fastrand::f64())).min(self.cap.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }
}
