use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff for change stream reconnects.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Delay is scaled by a random factor in `1 ± jitter_factor`.
    pub jitter_factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (0-based): `min(base * 2^attempt, max)` with jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * 2f64.powi(attempt.min(31) as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_millis((capped * factor) as u64)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
