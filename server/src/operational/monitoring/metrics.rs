// scrim_stats/server/src/operational/monitoring/metrics.rs
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use anyhow::{Context, Result};

// Analytics
pub const EVENTS_PROCESSED: &str = "stats_events_processed_total";
pub const EVENTS_FAILED: &str = "stats_events_failed_total";
pub const KILLS: &str = "stats_kills_total";
pub const DEATHS: &str = "stats_deaths_total";
pub const TRADE_KILLS: &str = "stats_trade_kills_total";
pub const MISSED_TRADES: &str = "stats_missed_trade_windows_total";
pub const CLUTCHES: &str = "stats_clutches_total";
pub const ENTRY_KILLS: &str = "stats_entry_kills_total";
pub const ROUNDS: &str = "stats_rounds_total";
pub const SESSIONS_ACTIVE: &str = "stats_sessions_active";
pub const EVENT_HANDLE_SECONDS: &str = "stats_event_handle_seconds";

// Persistence
pub const QUEUE_ENQUEUED: &str = "stats_queue_enqueued_total";
pub const QUEUE_DROPPED: &str = "stats_queue_dropped_total";
pub const QUEUE_DEPTH: &str = "stats_queue_depth";
pub const BATCHES_FLUSHED: &str = "stats_batches_flushed_total";
pub const BATCHES_FAILED: &str = "stats_batches_failed_total";
pub const FLUSH_RETRIES: &str = "stats_flush_retries_total";
pub const CIRCUIT_OPENS: &str = "stats_circuit_breaker_opens_total";
pub const FAILED_BUFFER_EVICTED: &str = "stats_failed_buffer_evicted_total";
pub const UPDATES_LOST: &str = "stats_updates_lost_total";
pub const FLUSH_SECONDS: &str = "stats_flush_seconds";

pub struct MetricsSystem {
    start_time: Instant,
}

impl MetricsSystem {
    /// Installs the Prometheus exporter when a listen address is given and
    /// registers descriptions for every metric this crate emits.
    pub fn new(listen: Option<SocketAddr>) -> Result<Self> {
        if let Some(addr) = listen {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("Failed to install Prometheus exporter")?;
        }

        describe_counter!(EVENTS_PROCESSED, "Game events handled by the analytics engine");
        describe_counter!(EVENTS_FAILED, "Game events skipped because their handler failed");
        describe_counter!(KILLS, "Kills observed");
        describe_counter!(DEATHS, "Deaths observed");
        describe_counter!(TRADE_KILLS, "Kills classified as trades");
        describe_counter!(MISSED_TRADES, "Trade opportunities that expired unconsumed");
        describe_counter!(CLUTCHES, "Clutch situations resolved at round end");
        describe_counter!(ENTRY_KILLS, "Opening kills");
        describe_counter!(ROUNDS, "Rounds completed");
        describe_gauge!(SESSIONS_ACTIVE, "Players with a live session");
        describe_histogram!(EVENT_HANDLE_SECONDS, "Time spent inside a single event handler");

        describe_counter!(QUEUE_ENQUEUED, "Persistence updates accepted into the queue");
        describe_counter!(QUEUE_DROPPED, "Persistence updates dropped because the queue was full or closed");
        describe_gauge!(QUEUE_DEPTH, "Persistence updates waiting in the queue");
        describe_counter!(BATCHES_FLUSHED, "Batches written to the repository");
        describe_counter!(BATCHES_FAILED, "Failed repository write attempts");
        describe_counter!(FLUSH_RETRIES, "Repository write retries");
        describe_counter!(CIRCUIT_OPENS, "Times the persistence circuit breaker opened");
        describe_counter!(FAILED_BUFFER_EVICTED, "Updates evicted from the failed-batch buffer");
        describe_counter!(UPDATES_LOST, "Updates still unflushed when shutdown timed out");
        describe_histogram!(FLUSH_SECONDS, "Repository write latency in seconds");

        Ok(MetricsSystem { start_time: Instant::now() })
    }

    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn update_session_count(&self, count: usize) {
        gauge!(SESSIONS_ACTIVE).set(count as f64);
    }
}

pub fn record_event_processed(kind: &'static str, seconds: f64) {
    counter!(EVENTS_PROCESSED, "kind" => kind).increment(1);
    histogram!(EVENT_HANDLE_SECONDS).record(seconds);
}

pub fn record_event_failed(kind: &'static str) {
    counter!(EVENTS_FAILED, "kind" => kind).increment(1);
}

// Logging setup
pub fn init_logging() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scrim_stats_core=info,scrim_stats=info,warn".into()),
        )
        .with(fmt::layer())
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
