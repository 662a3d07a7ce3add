use std::time::Duration;

use rand::Rng;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("attempt {attempt} exceeds the retry budget of {max_attempts}")]
pub struct AttemptsExhausted {
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Exponential backoff with symmetric jitter.
///
/// Shared by reference across every invocation of one service; never mutated
/// after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.1,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay, ..Self::default() }
    }

    pub fn with_jitter(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(2.0);
        self
    }

    /// Delay before the retry that follows `attempt` (1-based), jitter excluded.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(2.0).powi(exponent);
        let scaled = self.base_delay.as_nanos() as f64 * factor;
        let capped = scaled.min(self.max_delay.as_nanos() as f64).max(0.0);
        Duration::from_nanos(capped.round() as u64)
    }

    pub fn delay_for<R>(&self, attempt: u32, rng: &mut R) -> Result<Duration, AttemptsExhausted>
    where
        R: Rng + ?Sized,
    {
        if attempt == 0 || attempt > self.max_attempts {
            return Err(AttemptsExhausted { attempt, max_attempts: self.max_attempts });
        }

        let nominal = self.nominal_delay(attempt);
        let jitter = self.jitter_fraction.clamp(0.0, 1.0);
        if jitter == 0.0 || nominal.is_zero() {
            return Ok(nominal);
        }

        let offset: f64 = rng.gen_range(-jitter..=jitter);
        let jittered = (nominal.as_nanos() as f64 * (1.0 + offset)).max(0.0);
        Ok(Duration::from_nanos(jittered.round() as u64))
    }

    /// Upper bound on any value `delay_for` can return.
    pub fn ceiling(&self) -> Duration {
        let jitter = self.jitter_fraction.clamp(0.0, 1.0);
        Duration::from_nanos((self.max_delay.as_nanos() as f64 * (1.0 + jitter)).round() as u64)
    }
}
