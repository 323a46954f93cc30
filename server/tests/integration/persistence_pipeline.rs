// scrim_stats/server/tests/integration/persistence_pipeline.rs

use scrim_stats_core::core::config::PipelineConfig;
use scrim_stats_core::core::types::PlayerId;
use scrim_stats_core::entities::accumulator::PlayerAccumulator;
use scrim_stats_core::persistence::{EnqueueOutcome, InMemoryRepository, PersistencePipeline, PersistenceUpdate};
use scrim_stats_core::systems::snapshot::{assemble, assemble_weapons, SnapshotContext};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn pid(raw: u64) -> PlayerId {
    PlayerId::new(raw).unwrap()
}

fn player_update(raw: u64, kills: u32) -> PersistenceUpdate {
    let mut acc = PlayerAccumulator::new(pid(raw), format!("player{}", raw));
    acc.kills = kills;
    let context = SnapshotContext { match_id: None, round_number: Some(1), captured_at_ms: 0 };
    PersistenceUpdate::PlayerStats(assemble(&acc, context))
}

fn scratch_recovery_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("scrim-stats-it-{}", uuid::Uuid::new_v4()))
        .join("pending.zst")
}

#[tokio::test]
async fn full_queue_drops_without_blocking() {
    let repo = Arc::new(InMemoryRepository::new());
    let config = PipelineConfig { queue_capacity: 100, ..PipelineConfig::default() };
    let pipeline = PersistencePipeline::new(config, repo.clone());
    let handle = pipeline.handle();

    let outcomes: Vec<EnqueueOutcome> = (1..=150).map(|raw| handle.enqueue(player_update(raw, 1))).collect();
    let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
    let dropped = outcomes.iter().filter(|o| **o == EnqueueOutcome::Dropped).count();
    assert_eq!(accepted, 100);
    assert_eq!(dropped, 50);

    let stats = handle.stats();
    assert_eq!(stats.enqueued, 100);
    assert_eq!(stats.dropped, 50);
    assert_eq!(handle.queued(), 100);

    // never started: shutdown drains what made it in
    let report = pipeline.shutdown().await;
    assert_eq!(report.lost, 0);
    assert_eq!(report.flushed_updates, 100);
    assert_eq!(repo.players().len(), 100);
}

#[tokio::test(start_paused = true)]
async fn breaker_pauses_flushes_until_cooldown() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.set_available(false);
    let config = PipelineConfig {
        queue_capacity: 64,
        batch_size: 10,
        flush_concurrency: 1,
        flush_interval_ms: 50,
        max_retries: 4,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 40,
        retry_jitter_ms: 0,
        breaker_failure_threshold: 5,
        breaker_cooldown_ms: 30_000,
        ..PipelineConfig::default()
    };
    let mut pipeline = PersistencePipeline::new(config, repo.clone());
    let handle = pipeline.handle();
    assert!(handle.enqueue(player_update(1, 4)).is_accepted());
    pipeline.start();

    for _ in 0..100 {
        if handle.is_circuit_open() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.is_circuit_open());
    assert_eq!(repo.calls(), 5);
    let stats = handle.stats();
    assert_eq!(stats.circuit_opens, 1);
    assert_eq!(stats.batches_failed, 5);
    assert_eq!(stats.retries, 4);
    assert_eq!(stats.buffered_updates, 1);

    // producers are never blocked by an open breaker
    assert!(handle.enqueue(player_update(2, 1)).is_accepted());
    sleep(Duration::from_secs(10)).await;
    assert_eq!(repo.calls(), 5);

    repo.set_available(true);
    sleep(Duration::from_secs(25)).await;
    assert!(!handle.is_circuit_open());
    // the trial write carries the parked update together with the queued one
    assert_eq!(repo.calls(), 6);
    assert_eq!(repo.player(pid(1), None).unwrap().kills, 4);
    assert!(repo.player(pid(2), None).is_some());
    assert_eq!(handle.stats().buffered_updates, 0);

    let report = pipeline.shutdown().await;
    assert_eq!(report.lost, 0);
    assert_eq!(report.flushed_updates, 2);
}

#[tokio::test(start_paused = true)]
async fn batch_keeps_latest_write_per_row() {
    let repo = Arc::new(InMemoryRepository::new());
    let config = PipelineConfig { batch_size: 50, flush_interval_ms: 100, ..PipelineConfig::default() };
    let mut pipeline = PersistencePipeline::new(config, repo.clone());
    let handle = pipeline.handle();

    let mut acc = PlayerAccumulator::new(pid(9), "nine".into());
    for kills in 1..=5 {
        acc.record_kill("awp", kills % 2 == 0);
        let context = SnapshotContext { match_id: None, round_number: Some(kills), captured_at_ms: kills as u64 };
        handle.enqueue(PersistenceUpdate::PlayerStats(assemble(&acc, context)));
        for weapon in assemble_weapons(&acc, context) {
            handle.enqueue(PersistenceUpdate::WeaponStats(weapon));
        }
    }
    handle.enqueue(player_update(10, 1));
    pipeline.start();
    sleep(Duration::from_millis(250)).await;

    let stored = repo.player(pid(9), None).unwrap();
    assert_eq!(stored.kills, 5);
    assert_eq!(stored.round_number, Some(5));
    assert_eq!(repo.weapon_rows(), 1);
    let stats = handle.stats();
    assert_eq!(stats.enqueued, 11);
    assert_eq!(stats.coalesced, 8);
    assert_eq!(stats.flushed_updates, 3);

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn replayed_batch_never_overwrites_newer_write() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.set_available(false);
    let config = PipelineConfig {
        batch_size: 1,
        flush_concurrency: 2,
        flush_interval_ms: 50,
        max_retries: 0,
        breaker_failure_threshold: 100,
        ..PipelineConfig::default()
    };
    let mut pipeline = PersistencePipeline::new(config, repo.clone());
    let handle = pipeline.handle();
    handle.enqueue(player_update(2, 7));
    handle.enqueue(player_update(1, 1));
    pipeline.start();

    for _ in 0..100 {
        if handle.stats().buffered_updates == 2 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handle.stats().buffered_updates, 2);
    assert_eq!(repo.calls(), 2);

    repo.set_available(true);
    assert!(handle.enqueue(player_update(1, 2)).is_accepted());
    sleep(Duration::from_millis(200)).await;

    assert_eq!(repo.player(pid(1), None).unwrap().kills, 2);
    assert_eq!(repo.player(pid(2), None).unwrap().kills, 7);
    let stats = handle.stats();
    assert_eq!(stats.buffered_updates, 0);
    assert_eq!(stats.coalesced, 1);
    assert_eq!(stats.flushed_updates, 2);

    let report = pipeline.shutdown().await;
    assert_eq!(report.lost, 0);
    assert_eq!(repo.player(pid(1), None).unwrap().kills, 2);
}

#[tokio::test]
async fn unflushed_updates_survive_a_restart() {
    let path = scratch_recovery_path();
    let config = PipelineConfig { recovery_path: Some(path.clone()), ..PipelineConfig::default() };

    let down = Arc::new(InMemoryRepository::new());
    down.set_available(false);
    let pipeline = PersistencePipeline::open(config.clone(), down.clone()).await.unwrap();
    let handle = pipeline.handle();
    for raw in 1..=3 {
        assert!(handle.enqueue(player_update(raw, raw as u32)).is_accepted());
    }
    let report = pipeline.shutdown().await;
    assert_eq!(report.lost, 3);
    assert!(report.saved_for_recovery);
    assert!(path.exists());

    let up = Arc::new(InMemoryRepository::new());
    let pipeline = PersistencePipeline::open(config, up.clone()).await.unwrap();
    assert_eq!(pipeline.stats().recovered, 3);
    assert!(!path.exists());

    let report = pipeline.shutdown().await;
    assert_eq!(report.lost, 0);
    assert_eq!(report.flushed_updates, 3);
    assert_eq!(up.players().len(), 3);
    assert_eq!(up.player(pid(3), None).unwrap().kills, 3);
    assert!(!path.exists());

    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}
