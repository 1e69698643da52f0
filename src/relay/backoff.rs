//! Exponential backoff for bus reconnection

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomized in either direction (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Delay sequence `initial, initial * m, initial * m^2, ...` capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    next: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let next = config.initial;
        Self {
            config,
            next,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base = self.next.min(self.config.max);
        let grown = base.as_secs_f64() * self.config.multiplier;
        self.next = Duration::from_secs_f64(grown.min(self.config.max.as_secs_f64()));

        if self.config.jitter <= 0.0 {
            return base;
        }

        let spread = base.as_secs_f64() * self.config.jitter.min(1.0);
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.001))
    }

    pub fn reset(&mut self) {
        self.next = self.config.initial;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
