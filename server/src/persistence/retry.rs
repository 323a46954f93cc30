// scrim_stats/server/src/persistence/retry.rs
use crate::core::config::PipelineConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff: `base * 2^attempt`, capped at `max`, plus up to
/// `jitter` of random spread.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Backoff { base, max: max.max(base), jitter }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.retry_base_delay(), config.retry_max_delay(), config.retry_jitter())
    }

    /// Delay before retry number `attempt` (0-based) without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let spread = self.jitter.as_millis() as u64;
        let jitter = if spread == 0 { 0 } else { rand::thread_rng().gen_range(0..=spread) };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}
