// src/services/pacing.rs

//! Jittered delay applied before every upstream request.

use std::time::Duration;

use crate::models::CrawlerConfig;

/// Sleeps `base + random() * jitter` before each request.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    base: Duration,
    jitter: Duration,
}

impl Pacer {
    pub fn new(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    /// Build from config seconds. Negative, NaN or overflowing values become zero.
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(seconds(config.base_delay_secs), seconds(config.jitter_secs))
    }

    /// Delay for the next request.
    pub fn next_delay(&self) -> Duration {
        self.base
            .saturating_add(self.jitter.mul_f64(rand::random::<f64>()))
    }

    /// Wait out the delay for the next request.
    pub async fn wait(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
        log::warn!("Ignoring unusable delay of {} seconds", secs);
        Duration::ZERO
    })
}
