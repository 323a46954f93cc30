// scrim_stats/server/src/main.rs
use anyhow::{bail, Context, Result};
use scrim_stats_core::core::config::ServerConfig;
use scrim_stats_core::operational::monitoring::metrics::{init_logging, MetricsSystem};
use scrim_stats_core::persistence::InMemoryRepository;
use scrim_stats_core::server::event_loop::{event_channel, parse_event_line};
use scrim_stats_core::server::instance::StatsServer;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const USAGE: &str = "usage: scrim-stats <events.jsonl> [config.yaml]";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let mut args = std::env::args().skip(1);
    let Some(events_path) = args.next() else {
        bail!(USAGE);
    };
    let config = match args.next() {
        Some(path) => ServerConfig::load(Path::new(&path)).with_context(|| format!("Failed to load config {}", path))?,
        None => ServerConfig::default(),
    };

    let listen = config
        .metrics_listen
        .as_deref()
        .map(str::parse::<SocketAddr>)
        .transpose()
        .context("Invalid metrics_listen address")?;
    let metrics = MetricsSystem::new(listen)?;
    if let Some(addr) = listen {
        info!("Prometheus metrics on http://{}/metrics", addr);
    }

    info!("Scrim stats replay starting up...");
    let repository = Arc::new(InMemoryRepository::new());
    let server = StatsServer::new(config, repository.clone()).await?;
    let pipeline = server.pipeline_handle();
    let sessions = server.sessions.clone();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    let (tx, rx) = event_channel();
    let event_loop = tokio::spawn(server.run_event_loop(rx, cancel.clone()));

    let file = tokio::fs::File::open(&events_path)
        .await
        .with_context(|| format!("Failed to open {}", events_path))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no: u64 = 0;
    let mut sent: u64 = 0;
    let mut malformed: u64 = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_event_line(&line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
                sent += 1;
            }
            Err(e) => {
                malformed += 1;
                warn!("{}:{}: {}", events_path, line_no, e);
            }
        }
    }
    drop(tx);
    metrics.update_session_count(sessions.player_count());

    let report = event_loop.await.context("Event loop task failed")?;
    let stats = pipeline.stats();
    info!("Replayed {} events ({} malformed lines skipped)", sent, malformed);
    info!(
        "Pipeline: {} enqueued, {} dropped, {} coalesced, {} batches flushed, {} failed, {} retries, {} breaker opens",
        stats.enqueued,
        stats.dropped,
        stats.coalesced,
        stats.batches_flushed,
        stats.batches_failed,
        stats.retries,
        stats.circuit_opens
    );
    info!(
        "Stored {} player rows, {} weapon rows, {} round markers; {} updates lost",
        repository.players().len(),
        repository.weapon_rows(),
        repository.round_markers().len(),
        report.lost
    );
    info!("Scrim stats replay shut down after {:.2}s.", metrics.uptime_secs());
    Ok(())
}
