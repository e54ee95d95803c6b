use std::fmt::Display;
use std::thread;
use std::time::Duration;

/// Outcome classification for an operation run under [`with_retry`].
#[derive(Debug)]
pub enum Fault<E> {
    Retryable(E),
    Fatal(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Back-off before attempt `attempt + 1`, doubling from `base_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runs `op` until it succeeds, reports a fatal fault, or exhausts the
/// policy. The last error is returned in every failure case.
pub fn with_retry<T, E, F>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Result<T, Fault<E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(Fault::Fatal(err)) => return Err(err),
            Err(Fault::Retryable(err)) if attempt >= attempts => {
                log::warn!("{label}: giving up after {attempt} attempts: {err}");
                return Err(err);
            }
            Err(Fault::Retryable(err)) => {
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "{label}: attempt {attempt}/{attempts} failed: {err}; retrying in {delay:?}"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}
