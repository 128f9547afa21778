// Per-step timeout and bounded exponential backoff.

use std::time::Duration;

pub const DEFAULT_START_TO_CLOSE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAXIMUM_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKOFF_COEFFICIENT: f64 = 2.0;
pub const DEFAULT_MAXIMUM_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    /// Total attempts including the first one. Always at least 1.
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            backoff_coefficient: DEFAULT_BACKOFF_COEFFICIENT,
            maximum_interval: DEFAULT_MAXIMUM_INTERVAL,
            maximum_attempts: DEFAULT_MAXIMUM_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn with_maximum_attempts(mut self, maximum_attempts: u32) -> Self {
        self.maximum_attempts = maximum_attempts.max(1);
        self
    }

    pub fn with_intervals(mut self, initial: Duration, maximum: Duration) -> Self {
        self.initial_interval = initial;
        self.maximum_interval = maximum.max(initial);
        self
    }

    /// Delay before the attempt that follows attempt number `attempt` (1-based).
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let coefficient = self.backoff_coefficient.max(1.0);
        let seconds = self.initial_interval.as_secs_f64() * coefficient.powi(exponent);
        let capped = seconds.min(self.maximum_interval.as_secs_f64());
        if capped.is_finite() {
            Duration::from_secs_f64(capped)
        } else {
            self.maximum_interval
        }
    }

    pub fn allows_another_attempt(&self, attempts_made: u32) -> bool {
        attempts_made < self.maximum_attempts.max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOptions {
    /// Upper bound on a single attempt; the attempt is cancelled when it elapses.
    pub start_to_close_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self { start_to_close_timeout: DEFAULT_START_TO_CLOSE_TIMEOUT, retry: RetryPolicy::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SagaOptions {
    pub disable: StepOptions,
    pub notify: StepOptions,
}

impl SagaOptions {
    /// Same timeout and retry policy for both steps.
    pub fn uniform(step: StepOptions) -> Self {
        Self { disable: step.clone(), notify: step }
    }
}
