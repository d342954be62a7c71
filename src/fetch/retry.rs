use std::time::Duration;

use super::error::FetchError;

/// Backoff configuration shared by every fetch call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_total_wait: Duration,
    pub base: Duration,
    pub throttle_cap: Duration,
    pub transport_cap: Duration,
    pub throttle_jitter: Duration,
    pub transport_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 10,
            max_total_wait: Duration::from_secs(900),
            base: Duration::from_secs(2),
            throttle_cap: Duration::from_secs(180),
            transport_cap: Duration::from_secs(60),
            throttle_jitter: Duration::from_millis(2500),
            transport_jitter: Duration::from_millis(1500),
        }
    }
}

/// Why the previous attempt is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    /// Rate-limit response, with the server's advisory delay if it sent a numeric one.
    Throttled { retry_after: Option<Duration> },
    Transport,
}

impl RetryPolicy {
    /// Deterministic part of the wait before retry `attempt` (1-based).
    pub fn backoff(&self, cause: RetryCause, attempt: u32) -> Duration {
        let cap = match cause {
            RetryCause::Throttled { .. } => self.throttle_cap,
            RetryCause::Transport => self.transport_cap,
        };
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(cap)
    }

    fn jitter_range(&self, cause: RetryCause) -> Duration {
        match cause {
            RetryCause::Throttled { .. } => self.throttle_jitter,
            RetryCause::Transport => self.transport_jitter,
        }
    }
}

/// Per-call retry bookkeeping: attempt counter and cumulative backoff.
#[derive(Debug, Default)]
pub struct RetryState {
    attempt: u32,
    waited: Duration,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Account for one more retry and return how long to wait before it.
    /// Fails once the retry cap is spent or the projected total would pass the ceiling.
    pub fn next_wait(
        &mut self,
        policy: &RetryPolicy,
        cause: RetryCause,
        rng: &mut fastrand::Rng,
        url: &str,
        last: &str,
    ) -> Result<Duration, FetchError> {
        self.attempt += 1;
        if self.attempt > policy.max_retries {
            return Err(FetchError::RetriesExhausted {
                url: url.to_string(),
                attempts: policy.max_retries,
                last: last.to_string(),
            });
        }

        let wait = match cause {
            RetryCause::Throttled {
                retry_after: Some(advised),
            } => advised,
            _ => policy.backoff(cause, self.attempt) + policy.jitter_range(cause).mul_f64(rng.f64()),
        };

        let projected = self.waited + wait;
        if projected > policy.max_total_wait {
            return Err(FetchError::WaitCeilingExceeded {
                url: url.to_string(),
                waited: projected,
                ceiling: policy.max_total_wait,
                last: last.to_string(),
            });
        }
        self.waited = projected;
        Ok(wait)
    }
}

/// Only an all-digit header value counts; HTTP-date forms are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let v = value.trim();
    if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    v.parse::<u64>().ok().map(Duration::from_secs)
}
