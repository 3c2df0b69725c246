// ── Reconnection backoff ──

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Wait schedule for background reconnection.
///
/// Yields the delay to sleep before each attempt and ends once the
/// cumulative wait would exceed [`ReconnectConfig::max_total_wait`].
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    attempt: u32,
    delay: Duration,
    elapsed: Duration,
}

impl ReconnectBackoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            attempt: 0,
            delay,
            elapsed: Duration::ZERO,
        }
    }

    /// Number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Total wait handed out so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

impl Iterator for ReconnectBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let step = self.config.attempts_per_step.max(1);
        if self.attempt > 0 && self.attempt % step == 0 {
            self.delay = self.delay.saturating_mul(self.config.growth_factor);
        }
        if self.elapsed.saturating_add(self.delay) > self.config.max_total_wait {
            return None;
        }
        self.elapsed += self.delay;
        self.attempt += 1;
        Some(self.delay)
    }
}
