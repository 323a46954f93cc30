// scrim_stats/server/src/core/config.rs
use super::constants::*;
use super::error::{StatsError, StatsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Thresholds used by the combat analytics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub trade_window_secs: f64,
    pub trade_proximity_units: f32,
    pub clutch_base_points: f64,
    pub clutch_difficulty_weight: f64,
    pub high_impact_kill_threshold: u32,
    pub low_impact_margin: u32,
    pub max_kill_count_for_low_impact: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            trade_window_secs: DEFAULT_TRADE_WINDOW_SECS,
            trade_proximity_units: DEFAULT_TRADE_PROXIMITY_UNITS,
            clutch_base_points: DEFAULT_CLUTCH_BASE_POINTS,
            clutch_difficulty_weight: DEFAULT_CLUTCH_DIFFICULTY_WEIGHT,
            high_impact_kill_threshold: DEFAULT_HIGH_IMPACT_KILL_THRESHOLD,
            low_impact_margin: DEFAULT_LOW_IMPACT_MARGIN,
            max_kill_count_for_low_impact: DEFAULT_MAX_KILLS_FOR_LOW_IMPACT,
        }
    }
}

/// Queue, batching, retry, breaker and recovery settings for the persistence pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_concurrency: usize,
    pub flush_interval_ms: u64,
    pub enqueue_wait_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_ms: u64,
    pub failed_buffer_max_bytes: usize,
    pub recovery_path: Option<PathBuf>,
    pub recovery_checkpoint_interval_ms: u64,
    pub recovery_max_age_secs: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_concurrency: DEFAULT_FLUSH_CONCURRENCY,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            enqueue_wait_ms: DEFAULT_ENQUEUE_WAIT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            retry_jitter_ms: DEFAULT_RETRY_JITTER_MS,
            breaker_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_cooldown_ms: DEFAULT_BREAKER_COOLDOWN_MS,
            failed_buffer_max_bytes: DEFAULT_FAILED_BUFFER_MAX_BYTES,
            recovery_path: None,
            recovery_checkpoint_interval_ms: DEFAULT_RECOVERY_CHECKPOINT_INTERVAL_MS,
            recovery_max_age_secs: DEFAULT_RECOVERY_MAX_AGE_SECS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl PipelineConfig {
    pub fn flush_interval(&self) -> Duration { Duration::from_millis(self.flush_interval_ms) }
    pub fn enqueue_wait(&self) -> Duration { Duration::from_millis(self.enqueue_wait_ms) }
    pub fn retry_base_delay(&self) -> Duration { Duration::from_millis(self.retry_base_delay_ms) }
    pub fn retry_max_delay(&self) -> Duration { Duration::from_millis(self.retry_max_delay_ms) }
    pub fn retry_jitter(&self) -> Duration { Duration::from_millis(self.retry_jitter_ms) }
    pub fn breaker_cooldown(&self) -> Duration { Duration::from_millis(self.breaker_cooldown_ms) }
    pub fn recovery_checkpoint_interval(&self) -> Duration { Duration::from_millis(self.recovery_checkpoint_interval_ms) }
    pub fn recovery_max_age(&self) -> Duration { Duration::from_secs(self.recovery_max_age_secs) }
    pub fn shutdown_timeout(&self) -> Duration { Duration::from_millis(self.shutdown_timeout_ms) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub analytics: AnalyticsConfig,
    pub pipeline: PipelineConfig,
    pub auto_flush_interval_ms: u64,
    pub metrics_listen: Option<String>, // e.g. "0.0.0.0:9090"; no exporter when unset
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            analytics: AnalyticsConfig::default(),
            pipeline: PipelineConfig::default(),
            auto_flush_interval_ms: DEFAULT_AUTO_FLUSH_INTERVAL_MS,
            metrics_listen: None,
        }
    }
}

impl ServerConfig {
    pub fn auto_flush_interval(&self) -> Duration {
        Duration::from_millis(self.auto_flush_interval_ms)
    }

    pub fn from_yaml_str(raw: &str) -> StatsResult<Self> {
        let config: ServerConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> StatsResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> StatsResult<()> {
        let a = &self.analytics;
        if !(a.trade_window_secs.is_finite() && a.trade_window_secs > 0.0) {
            return Err(StatsError::ConfigError("analytics.trade_window_secs must be positive".into()));
        }
        if !(a.trade_proximity_units.is_finite() && a.trade_proximity_units >= 0.0) {
            return Err(StatsError::ConfigError("analytics.trade_proximity_units must be non-negative".into()));
        }
        if a.high_impact_kill_threshold == 0 {
            return Err(StatsError::ConfigError("analytics.high_impact_kill_threshold must be >= 1".into()));
        }

        let p = &self.pipeline;
        if p.queue_capacity == 0 {
            return Err(StatsError::ConfigError("pipeline.queue_capacity must be >= 1".into()));
        }
        if p.batch_size == 0 {
            return Err(StatsError::ConfigError("pipeline.batch_size must be >= 1".into()));
        }
        if p.flush_concurrency == 0 {
            return Err(StatsError::ConfigError("pipeline.flush_concurrency must be >= 1".into()));
        }
        if p.breaker_failure_threshold == 0 {
            return Err(StatsError::ConfigError("pipeline.breaker_failure_threshold must be >= 1".into()));
        }
        if p.flush_interval_ms == 0 {
            return Err(StatsError::ConfigError("pipeline.flush_interval_ms must be >= 1".into()));
        }
        if p.recovery_path.is_some() && p.recovery_checkpoint_interval_ms == 0 {
            return Err(StatsError::ConfigError("pipeline.recovery_checkpoint_interval_ms must be >= 1".into()));
        }
        if self.auto_flush_interval_ms == 0 {
            return Err(StatsError::ConfigError("auto_flush_interval_ms must be >= 1".into()));
        }
        Ok(())
    }
}
