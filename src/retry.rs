use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff shape for the reconnect policy: fixed delay or exponential growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    Fixed,
    Exponential,
}

/// Reconnect policy for the managed socket / tail stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub mode: BackoffMode,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_ratio: f64,
    /// `None` means unlimited attempts.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            mode: BackoffMode::Exponential,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(15_000),
            multiplier: 2.0,
            jitter_ratio: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Base delay (pre-jitter) for attempt `n`, 1-based.
    fn base_delay(&self, attempt: u32) -> Duration {
        match self.mode {
            BackoffMode::Fixed => self.initial_delay,
            BackoffMode::Exponential => {
                let scaled = self.initial_delay.as_secs_f64()
                    * self.multiplier.powi((attempt - 1) as i32);
                Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
            }
        }
    }

    /// Whether another attempt is permitted after `attempts_so_far` completed attempts.
    pub fn allows_attempt(&self, attempts_so_far: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts_so_far < max,
            None => true,
        }
    }

    fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(*self)
    }

    /// Construct a fresh [`ExponentialBackoff`] generator for a new connection cycle.
    pub fn backoff(&self) -> ExponentialBackoff {
        self.new_backoff()
    }
}

/// Stateful generator of reconnect delays for one connection cycle. Each call to
/// [`ExponentialBackoff::next`] returns the jittered delay for the next attempt, or
/// `None` once the policy's attempt budget is exhausted.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ExponentialBackoff {
    fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Reset the attempt counter to zero, as if no attempts have yet been made.
    /// Used when a connection makes partial progress before dropping.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }

    /// Advance to the next attempt and return its delay, or `None` if the attempt
    /// budget configured on the policy has been exhausted.
    pub fn next(&mut self) -> Option<Duration> {
        if !self.policy.allows_attempt(self.attempt) {
            return None;
        }
        self.attempt += 1;
        let base = self.policy.base_delay(self.attempt);
        Some(jitter(base, self.policy.jitter_ratio))
    }
}

/// Apply symmetric jitter: uniform in `[max(0, base*(1-ratio)), base*(1+ratio)]`.
fn jitter(base: Duration, ratio: f64) -> Duration {
    if ratio <= 0.0 {
        return base;
    }
    let secs = base.as_secs_f64();
    let lo = (secs * (1.0 - ratio)).max(0.0);
    let hi = secs * (1.0 + ratio);
    let delay = if hi > lo {
        rand::thread_rng().gen_range(lo..=hi)
    } else {
        lo
    };
    Duration::from_secs_f64(delay)
}
