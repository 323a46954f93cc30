// scrim_stats/server/src/core/constants.rs
use std::time::Duration;

// Trade / proximity defaults (units are game world units)
pub const DEFAULT_TRADE_WINDOW_SECS: f64 = 5.0;
pub const DEFAULT_TRADE_PROXIMITY_UNITS: f32 = 750.0;

// Clutch scoring
pub const DEFAULT_CLUTCH_BASE_POINTS: f64 = 1.0;
pub const DEFAULT_CLUTCH_DIFFICULTY_WEIGHT: f64 = 0.5;

// Impact classification
pub const DEFAULT_HIGH_IMPACT_KILL_THRESHOLD: u32 = 3;
pub const DEFAULT_LOW_IMPACT_MARGIN: u32 = 3;
pub const DEFAULT_MAX_KILLS_FOR_LOW_IMPACT: u32 = 1;

// Multi-kill tiers start at this many kills in one round
pub const MULTI_KILL_MIN: u32 = 2;
pub const ACE_KILLS: u32 = 5;

// Rating weights. rating = W_KILL*kpr + W_SURVIVAL*spr + W_IMPACT*impact + W_KAST*kast
// where kpr/spr are per-round rates, impact is the per-round impact sub-score
// and kast is a 0..1 fraction. An average player lands close to 1.0.
pub const RATING_WEIGHT_KILL: f64 = 0.50;
pub const RATING_WEIGHT_SURVIVAL: f64 = 0.40;
pub const RATING_WEIGHT_IMPACT: f64 = 0.60;
pub const RATING_WEIGHT_KAST: f64 = 0.45;

// Impact sub-score components (summed then divided by rounds played)
pub const IMPACT_DOUBLE_KILL: f64 = 0.5;
pub const IMPACT_TRIPLE_KILL: f64 = 1.0;
pub const IMPACT_QUAD_KILL: f64 = 1.5;
pub const IMPACT_ACE: f64 = 2.0;
pub const IMPACT_ENTRY_KILL: f64 = 0.4;
pub const IMPACT_MVP: f64 = 0.25;

// Persistence pipeline defaults
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_CONCURRENCY: usize = 4;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 250;
pub const DEFAULT_ENQUEUE_WAIT_MS: u64 = 50;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
pub const DEFAULT_RETRY_JITTER_MS: u64 = 25;
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 30_000;
pub const DEFAULT_FAILED_BUFFER_MAX_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_RECOVERY_CHECKPOINT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_RECOVERY_MAX_AGE_SECS: u64 = 600;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

// Server loop
pub const DEFAULT_AUTO_FLUSH_INTERVAL_MS: u64 = 30_000;
pub const EVENT_CHANNEL_CAPACITY: usize = 8192;
pub const SUPERVISOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const SLOW_EVENT_LOG_MS: u64 = 5; // warn if a single event handler exceeds this

// Grenade weapon names counted as utility damage
pub const UTILITY_WEAPONS: &[&str] = &[
    "hegrenade",
    "inferno",
    "molotov",
    "incgrenade",
    "flashbang",
    "smokegrenade",
    "decoy",
];
