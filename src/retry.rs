//! Retry policy: decides whether a failed task gets another attempt and
//! how long to make it wait first.

use std::time::Duration;

use rand::Rng;

use crate::config::{RetryBackoff, RetryStrategy};
use crate::model::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

pub struct RetryPolicy {
    strategy: RetryStrategy,
}

impl RetryPolicy {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self { strategy }
    }

    /// `retry_count` is the number of attempts already made (0 on first failure).
    pub fn decide(&self, kind: ErrorKind, retry_count: u32) -> RetryDecision {
        if !self.strategy.enabled || !kind.is_retryable() {
            return RetryDecision::GiveUp;
        }
        if retry_count >= self.strategy.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.backoff_with_jitter(retry_count),
        }
    }

    fn backoff_with_jitter(&self, retry_count: u32) -> Duration {
        match self.strategy.strategy {
            RetryBackoff::Immediate => Duration::ZERO,
            RetryBackoff::Fixed => self.strategy.base_delay.min(self.strategy.max_delay),
            RetryBackoff::Exponential => {
                let base = self.strategy.base_delay.as_secs_f64();
                let exp = base * 2f64.powi(retry_count as i32);
                let capped = exp.min(self.strategy.max_delay.as_secs_f64());
                let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
                let jittered = (capped * (1.0 + jitter)).max(0.0);
                Duration::from_secs_f64(jittered)
            }
        }
    }
}
