use std::time::Duration;

use crate::core::errors::FailureClass;

/// Exponential backoff with a ceiling on attempts and on delay.
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
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_attempt: u32, delay: Duration },
    DeadLetter,
    Halt,
}

impl RetryPolicy {
    /// Delay before the attempt that follows failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn decide(&self, attempt: u32, class: FailureClass) -> RetryDecision {
        match class {
            FailureClass::Fatal => RetryDecision::Halt,
            FailureClass::Permanent => RetryDecision::DeadLetter,
            FailureClass::Retryable if attempt >= self.max_attempts => RetryDecision::DeadLetter,
            FailureClass::Retryable => RetryDecision::Retry {
                next_attempt: attempt + 1,
                delay: self.delay_after(attempt),
            },
        }
    }
}
