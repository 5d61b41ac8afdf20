//! Reconnect delay policy.

use std::time::Duration;

use serde::Deserialize;

/// Longest delay any policy produces, in seconds.
pub const MAX_DELAY_SECS: f64 = 86_400.0;

/// Delay between a failed session and the next connection attempt.
///
/// The default is a fixed five second delay. With `multiplier > 1.0` the
/// delay grows per consecutive failure up to `max`. There is no attempt
/// cap: only cancellation ends the retry loop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay after the first failure, in seconds.
    pub initial_secs: f64,

    /// Growth factor per consecutive failure.
    pub multiplier: f64,

    /// Upper bound on the delay, in seconds.
    pub max_secs: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_secs: 5.0,
            multiplier: 1.0,
            max_secs: 5.0,
        }
    }
}

impl BackoffPolicy {
    /// A fixed delay.
    pub fn fixed(delay: Duration) -> Self {
        let secs = delay.as_secs_f64();
        Self {
            initial_secs: secs,
            multiplier: 1.0,
            max_secs: secs,
        }
    }

    pub fn initial(&self) -> Duration {
        secs_to_duration(self.initial_secs)
    }

    /// Delay to use after `current`.
    pub fn next(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.multiplier.max(1.0);
        let capped = grown.min(self.max_secs.max(self.initial_secs));
        secs_to_duration(capped)
    }
}

/// Converts seconds to a delay, clamped to `[0, MAX_DELAY_SECS]`.
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    let max = Duration::from_secs(MAX_DELAY_SECS as u64);
    Duration::try_from_secs_f64(secs.min(MAX_DELAY_SECS)).map_or(max, |d| d.min(max))
}
