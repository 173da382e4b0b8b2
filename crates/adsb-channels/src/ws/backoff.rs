// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Reconnect delay policy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Growth factor per attempt (values below 1 are treated as 1).
    pub multiplier: f64,
    /// Upper bound of the un-jittered delay.
    pub max_delay: Duration,
    /// Random spread as a fraction of the delay, `0.2` = ±20%.
    pub jitter: f64,
    /// Give up after this many consecutive failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

/// Attempt counter producing reconnect delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Un-jittered delay for the given attempt number.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.config.initial_delay.as_secs_f64() * self.config.multiplier.max(1.0).powi(exponent);
        let capped = secs.min(self.config.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.config.max_delay)
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }

        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(self.jittered(base))
    }

    fn jittered(&self, base: Duration) -> Duration {
        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }
}
