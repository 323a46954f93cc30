// scrim_stats/server/src/persistence/pipeline.rs
use super::circuit_breaker::CircuitBreaker;
use super::failed_buffer::FailedBatchBuffer;
use super::recovery::{self, RecoveryOutcome};
use super::retry::Backoff;
use super::{coalesce, GroupedBatch, PersistenceUpdate, RepositoryError, StatsRepository};
use crate::concurrent::update_queue::UpdateQueue;
use crate::core::config::PipelineConfig;
use crate::core::error::{StatsError, StatsResult};
use crate::operational::monitoring::metrics::{
    BATCHES_FAILED, BATCHES_FLUSHED, CIRCUIT_OPENS, FAILED_BUFFER_EVICTED, FLUSH_RETRIES, FLUSH_SECONDS,
    QUEUE_DEPTH, QUEUE_DROPPED, QUEUE_ENQUEUED, UPDATES_LOST,
};
use ahash::AHashMap;
use futures::future::join_all;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Queue full; counted as dropped.
    Dropped,
    /// Pipeline is shutting down.
    Rejected,
}

impl EnqueueOutcome {
    pub fn is_accepted(self) -> bool {
        self == EnqueueOutcome::Accepted
    }
}

#[derive(Debug, Default)]
struct PipelineStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    flushed_updates: AtomicU64,
    coalesced: AtomicU64,
    batches_flushed: AtomicU64,
    batches_failed: AtomicU64,
    retries: AtomicU64,
    evicted: AtomicU64,
    recovered: AtomicU64,
    discarded_stale: AtomicU64,
    lost: AtomicU64,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub flushed_updates: u64,
    pub coalesced: u64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    pub retries: u64,
    pub circuit_opens: u64,
    pub buffered_batches: usize,
    pub buffered_updates: usize,
    pub evicted: u64,
    pub recovered: u64,
    pub discarded_stale: u64,
    pub lost: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub flushed_updates: u64,
    pub lost: usize,
    pub timed_out: bool,
    pub saved_for_recovery: bool,
}

struct PipelineShared {
    config: PipelineConfig,
    repository: Arc<dyn StatsRepository>,
    queue: UpdateQueue,
    accepting: AtomicBool,
    stats: PipelineStats,
    breaker: CircuitBreaker,
    backoff: Backoff,
    failed: Mutex<FailedBatchBuffer>,
    in_flight: Mutex<AHashMap<u64, Vec<PersistenceUpdate>>>,
    next_batch_id: AtomicU64,
}

impl PipelineShared {
    fn snapshot(&self) -> PipelineStatsSnapshot {
        let s = &self.stats;
        let (buffered_batches, buffered_updates) = {
            let failed = self.failed.lock();
            (failed.batch_count(), failed.update_count())
        };
        PipelineStatsSnapshot {
            enqueued: s.enqueued.load(Ordering::Relaxed),
            dropped: s.dropped.load(Ordering::Relaxed),
            rejected: s.rejected.load(Ordering::Relaxed),
            flushed_updates: s.flushed_updates.load(Ordering::Relaxed),
            coalesced: s.coalesced.load(Ordering::Relaxed),
            batches_flushed: s.batches_flushed.load(Ordering::Relaxed),
            batches_failed: s.batches_failed.load(Ordering::Relaxed),
            retries: s.retries.load(Ordering::Relaxed),
            circuit_opens: self.breaker.opens(),
            buffered_batches,
            buffered_updates,
            evicted: s.evicted.load(Ordering::Relaxed),
            recovered: s.recovered.load(Ordering::Relaxed),
            discarded_stale: s.discarded_stale.load(Ordering::Relaxed),
            lost: s.lost.load(Ordering::Relaxed),
        }
    }

    fn buffer_failed(&self, batch: Vec<PersistenceUpdate>) {
        if batch.is_empty() {
            return;
        }
        let size = batch.len();
        let evicted = self.failed.lock().push(batch);
        debug!("Buffered {} updates for a later replay", size);
        if evicted > 0 {
            self.stats.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            counter!(FAILED_BUFFER_EVICTED).increment(evicted as u64);
            warn!("Failed-batch buffer over its byte budget; evicted {} oldest updates", evicted);
        }
    }

    /// Updates not yet known to be durable outside the queue.
    fn pending_updates(&self) -> Vec<PersistenceUpdate> {
        let mut pending: Vec<PersistenceUpdate> =
            self.in_flight.lock().values().flat_map(|batch| batch.iter().cloned()).collect();
        pending.extend(self.failed.lock().cloned_updates());
        pending
    }

    /// One repository write, with breaker and counter bookkeeping.
    async fn attempt_flush(&self, batch: &[PersistenceUpdate]) -> Result<(), RepositoryError> {
        let started = Instant::now();
        let result = write_batch(self.repository.as_ref(), batch).await;
        histogram!(FLUSH_SECONDS).record(started.elapsed().as_secs_f64());
        match &result {
            Ok(()) => {
                self.breaker.record_success();
                self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
                self.stats.flushed_updates.fetch_add(batch.len() as u64, Ordering::Relaxed);
                counter!(BATCHES_FLUSHED).increment(1);
                trace!("Flushed batch of {} updates", batch.len());
            }
            Err(_) => {
                self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                counter!(BATCHES_FAILED).increment(1);
                if self.breaker.record_failure(Instant::now()) {
                    counter!(CIRCUIT_OPENS).increment(1);
                }
            }
        }
        result
    }

    fn track(&self, batch: &[PersistenceUpdate]) -> u64 {
        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        self.in_flight.lock().insert(id, batch.to_vec());
        id
    }

    fn untrack(&self, id: u64) {
        self.in_flight.lock().remove(&id);
    }
}

async fn write_batch(repository: &dyn StatsRepository, updates: &[PersistenceUpdate]) -> Result<(), RepositoryError> {
    let grouped = GroupedBatch::from_updates(updates);
    if !grouped.players.is_empty() {
        repository.upsert_players(&grouped.players).await?;
    }
    if !grouped.matches.is_empty() {
        repository.upsert_match_summaries(&grouped.matches).await?;
    }
    if !grouped.weapons.is_empty() {
        repository.upsert_weapon_stats(&grouped.weapons).await?;
    }
    if !grouped.rounds.is_empty() {
        repository.record_round_markers(&grouped.rounds).await?;
    }
    Ok(())
}

/// Retries a batch with backoff. Gives up early once the breaker is open or
/// shutdown has begun; a batch that is given up on goes to the failed buffer.
async fn flush_with_retry(
    shared: &PipelineShared,
    batch: Vec<PersistenceUpdate>,
    cancel: &CancellationToken,
) -> bool {
    let id = shared.track(&batch);
    let mut attempt: u32 = 0;
    let flushed = loop {
        match shared.attempt_flush(&batch).await {
            Ok(()) => break true,
            Err(e) => {
                warn!(
                    "Flush of {} updates failed (attempt {}/{}): {}",
                    batch.len(),
                    attempt + 1,
                    shared.config.max_retries + 1,
                    e
                );
                if attempt >= shared.config.max_retries
                    || cancel.is_cancelled()
                    || shared.breaker.is_open(Instant::now())
                {
                    break false;
                }
                let delay = shared.backoff.delay(attempt);
                attempt += 1;
                shared.stats.retries.fetch_add(1, Ordering::Relaxed);
                counter!(FLUSH_RETRIES).increment(1);
                tokio::select! {
                    _ = cancel.cancelled() => break false,
                    _ = sleep(delay) => {}
                }
            }
        }
    };
    shared.untrack(id);
    if !flushed {
        shared.buffer_failed(batch);
    }
    flushed
}

/// Pulls every parked update together with fresh queue contents so a replay
/// can never land behind a newer write for the same key.
fn take_pending(shared: &PipelineShared, from_queue: usize) -> (Vec<PersistenceUpdate>, usize) {
    let mut pending = shared.failed.lock().drain_all();
    let replayed = pending.len();
    pending.extend(shared.queue.pop_batch(from_queue));
    gauge!(QUEUE_DEPTH).set(shared.queue.len() as f64);
    (pending, replayed)
}

fn coalesce_counted(shared: &PipelineShared, pending: Vec<PersistenceUpdate>) -> Vec<PersistenceUpdate> {
    let before = pending.len();
    let updates = coalesce(pending);
    let collapsed = before - updates.len();
    if collapsed > 0 {
        shared.stats.coalesced.fetch_add(collapsed as u64, Ordering::Relaxed);
    }
    updates
}

async fn flush_cycle(shared: &PipelineShared, cancel: &CancellationToken) {
    if !shared.breaker.allow_request(Instant::now()) {
        trace!("Circuit open, skipping flush cycle ({} queued)", shared.queue.len());
        return;
    }

    let batch_size = shared.config.batch_size.max(1);
    let (pending, replayed) = take_pending(shared, batch_size * shared.config.flush_concurrency.max(1));
    if pending.is_empty() {
        return;
    }
    if replayed > 0 {
        debug!("Replaying {} buffered updates with {} fresh ones", replayed, pending.len() - replayed);
    }

    let updates = coalesce_counted(shared, pending);
    let mut batches = updates.chunks(batch_size).map(<[_]>::to_vec).collect::<Vec<_>>().into_iter();
    loop {
        let concurrency = if shared.breaker.is_half_open() { 1 } else { shared.config.flush_concurrency.max(1) };
        let wave: Vec<Vec<PersistenceUpdate>> = batches.by_ref().take(concurrency).collect();
        if wave.is_empty() {
            return;
        }
        let results = join_all(wave.into_iter().map(|batch| flush_with_retry(shared, batch, cancel))).await;
        if results.iter().any(|flushed| !flushed) {
            // keys are unique after coalescing, so parking order does not matter
            for rest in batches {
                shared.buffer_failed(rest);
            }
            return;
        }
    }
}

async fn run_batcher(shared: Arc<PipelineShared>, cancel: CancellationToken) {
    let mut ticker = interval(shared.config.flush_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "Persistence batcher started (batch size {}, concurrency {}, interval {:?})",
        shared.config.batch_size,
        shared.config.flush_concurrency,
        shared.config.flush_interval()
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = shared.queue.items_available() => {
                if shared.queue.len() < shared.config.batch_size {
                    continue;
                }
            }
        }
        flush_cycle(&shared, &cancel).await;
    }
    debug!("Persistence batcher stopped");
}

async fn run_checkpointer(shared: Arc<PipelineShared>, cancel: CancellationToken, path: PathBuf) {
    let mut ticker = interval(shared.config.recovery_checkpoint_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let pending = shared.pending_updates();
        let target = path.clone();
        match tokio::task::spawn_blocking(move || recovery::write_checkpoint(&target, &pending)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to write recovery checkpoint {}: {}", path.display(), e),
            Err(e) => error!("Recovery checkpoint task panicked: {}", e),
        }
    }
}

/// Single attempts only; stops at the first failure or an open breaker.
async fn drain_for_shutdown(shared: &PipelineShared) {
    let batch_size = shared.config.batch_size.max(1);
    loop {
        if !shared.breaker.allow_request(Instant::now()) {
            warn!("Circuit open during shutdown drain; remaining updates stay unflushed");
            return;
        }
        let (pending, _) = take_pending(shared, batch_size);
        if pending.is_empty() {
            return;
        }
        let mut batches = coalesce_counted(shared, pending).into_iter().peekable();
        while batches.peek().is_some() {
            let batch: Vec<PersistenceUpdate> = batches.by_ref().take(batch_size).collect();
            let id = shared.track(&batch);
            let result = shared.attempt_flush(&batch).await;
            shared.untrack(id);
            if let Err(e) = result {
                warn!("Shutdown flush of {} updates failed: {}", batch.len(), e);
                shared.buffer_failed(batch);
                shared.buffer_failed(batches.collect());
                return;
            }
        }
    }
}

/// Cloneable producer side of the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<PipelineShared>,
}

impl PipelineHandle {
    /// Never blocks. A full queue drops the update and counts it.
    pub fn enqueue(&self, update: PersistenceUpdate) -> EnqueueOutcome {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return self.reject(&update);
        }
        match self.shared.queue.push(update) {
            Ok(()) => self.accepted(),
            Err(update) => self.dropped(&update),
        }
    }

    /// Waits up to the configured enqueue wait for space before dropping.
    pub async fn enqueue_with_wait(&self, update: PersistenceUpdate) -> EnqueueOutcome {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return self.reject(&update);
        }
        match self.shared.queue.push_timeout(update, self.shared.config.enqueue_wait()).await {
            Ok(()) => self.accepted(),
            Err(update) => self.dropped(&update),
        }
    }

    fn accepted(&self) -> EnqueueOutcome {
        self.shared.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        counter!(QUEUE_ENQUEUED).increment(1);
        gauge!(QUEUE_DEPTH).set(self.shared.queue.len() as f64);
        EnqueueOutcome::Accepted
    }

    fn dropped(&self, update: &PersistenceUpdate) -> EnqueueOutcome {
        self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
        counter!(QUEUE_DROPPED, "reason" => "full").increment(1);
        debug!("Persistence queue full, dropped {} update", update.kind());
        EnqueueOutcome::Dropped
    }

    fn reject(&self, update: &PersistenceUpdate) -> EnqueueOutcome {
        self.shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
        counter!(QUEUE_DROPPED, "reason" => "closed").increment(1);
        debug!("Persistence pipeline closed, rejected {} update", update.kind());
        EnqueueOutcome::Rejected
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.shared.snapshot()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_circuit_open(&self) -> bool {
        self.shared.breaker.is_open(Instant::now())
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }
}

/// Bounded queue, batcher, retry, circuit breaker, failed-batch buffer and
/// crash-recovery checkpoints in front of a `StatsRepository`.
pub struct PersistencePipeline {
    shared: Arc<PipelineShared>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl PersistencePipeline {
    /// Builds an idle pipeline. Enqueues are accepted immediately; nothing is
    /// flushed until `start`.
    pub fn new(config: PipelineConfig, repository: Arc<dyn StatsRepository>) -> Self {
        let shared = PipelineShared {
            queue: UpdateQueue::new(config.queue_capacity),
            accepting: AtomicBool::new(true),
            stats: PipelineStats::default(),
            breaker: CircuitBreaker::new(config.breaker_failure_threshold, config.breaker_cooldown()),
            backoff: Backoff::from_config(&config),
            failed: Mutex::new(FailedBatchBuffer::new(config.failed_buffer_max_bytes)),
            in_flight: Mutex::new(AHashMap::new()),
            next_batch_id: AtomicU64::new(0),
            repository,
            config,
        };
        PersistencePipeline { shared: Arc::new(shared), cancel: CancellationToken::new(), tasks: Vec::new() }
    }

    /// `new` followed by crash recovery, so recovered updates are queued ahead
    /// of any new traffic.
    pub async fn open(config: PipelineConfig, repository: Arc<dyn StatsRepository>) -> StatsResult<Self> {
        let pipeline = Self::new(config, repository);
        pipeline.recover().await?;
        Ok(pipeline)
    }

    /// Replays a recent recovery file and deletes it. Returns the number of
    /// updates recovered.
    pub async fn recover(&self) -> StatsResult<usize> {
        let Some(path) = self.shared.config.recovery_path.clone() else {
            return Ok(0);
        };
        let max_age = self.shared.config.recovery_max_age();
        let load_path = path.clone();
        let outcome = tokio::task::spawn_blocking(move || recovery::load_checkpoint(&load_path, max_age))
            .await
            .map_err(|e| StatsError::Internal(format!("recovery load task failed: {}", e)))??;

        match outcome {
            RecoveryOutcome::Missing => Ok(0),
            RecoveryOutcome::Stale { discarded, .. } => {
                self.shared.stats.discarded_stale.fetch_add(discarded as u64, Ordering::Relaxed);
                Ok(0)
            }
            RecoveryOutcome::Loaded(updates) => {
                let total = updates.len();
                let mut overflow = Vec::new();
                for update in updates {
                    if let Err(update) = self.shared.queue.push(update) {
                        overflow.push(update);
                    }
                }
                if !overflow.is_empty() {
                    warn!("Recovery exceeded queue capacity; {} updates parked in the failed buffer", overflow.len());
                    self.shared.buffer_failed(overflow);
                }
                self.shared.stats.recovered.fetch_add(total as u64, Ordering::Relaxed);
                recovery::remove_checkpoint(&path)?;
                info!("Re-enqueued {} updates from {}", total, path.display());
                Ok(total)
            }
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle { shared: self.shared.clone() }
    }

    /// Spawns the batcher and, when a recovery path is configured, the
    /// checkpoint writer. Calling it twice has no effect.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        let batcher = tokio::spawn(run_batcher(self.shared.clone(), self.cancel.clone()));
        self.tasks.push(("batcher", batcher));
        if let Some(path) = self.shared.config.recovery_path.clone() {
            let checkpointer = tokio::spawn(run_checkpointer(self.shared.clone(), self.cancel.clone(), path));
            self.tasks.push(("checkpointer", checkpointer));
        }
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.shared.snapshot()
    }

    /// Stops accepting, lets in-flight flushes finish, drains what is left
    /// within the shutdown timeout and reports everything still unflushed as
    /// lost. Lost updates are written to the recovery file when one is set.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let shared = self.shared.clone();
        shared.accepting.store(false, Ordering::Release);
        self.cancel.cancel();
        info!("Persistence pipeline shutting down with {} queued updates", shared.queue.len());

        let deadline = Instant::now() + shared.config.shutdown_timeout();
        let mut timed_out = false;
        for (name, mut handle) in self.tasks.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Pipeline task '{}' failed: {}", name, e),
                Err(_) => {
                    handle.abort();
                    timed_out = true;
                    warn!("Pipeline task '{}' did not stop before the shutdown deadline", name);
                }
            }
        }

        if !timed_out {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, drain_for_shutdown(&shared)).await.is_err() {
                timed_out = true;
                warn!("Shutdown drain exceeded {:?}", shared.config.shutdown_timeout());
            }
        }

        let mut leftovers: Vec<PersistenceUpdate> =
            shared.in_flight.lock().drain().flat_map(|(_, batch)| batch).collect();
        leftovers.extend(shared.failed.lock().drain_all());
        leftovers.extend(shared.queue.pop_batch(usize::MAX));

        let lost = leftovers.len();
        let mut saved_for_recovery = false;
        if lost > 0 {
            shared.stats.lost.fetch_add(lost as u64, Ordering::Relaxed);
            counter!(UPDATES_LOST).increment(lost as u64);
            error!("{} persistence updates were not flushed before shutdown", lost);
        }
        if let Some(path) = shared.config.recovery_path.as_ref() {
            match recovery::write_checkpoint(path, &leftovers) {
                Ok(()) => {
                    saved_for_recovery = lost > 0;
                    if saved_for_recovery {
                        info!("Saved {} unflushed updates to {} for the next start", lost, path.display());
                    }
                }
                Err(e) => error!("Could not save unflushed updates to {}: {}", path.display(), e),
            }
        }

        let flushed_updates = shared.stats.flushed_updates.load(Ordering::Relaxed);
        info!("Persistence pipeline stopped: {} updates flushed, {} lost", flushed_updates, lost);
        ShutdownReport { flushed_updates, lost, timed_out, saved_for_recovery }
    }
}
