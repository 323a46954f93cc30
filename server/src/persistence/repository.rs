// scrim_stats/server/src/persistence/repository.rs
use crate::core::types::PlayerId;
use crate::systems::snapshot::{
    MatchSummarySnapshot, PlayerSnapshot, RoundMarker, RoundPhase, WeaponStatsSnapshot,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Repository call timed out")]
    Timeout,
}

/// Durable sink for computed stats. Every call is an idempotent upsert keyed
/// by player and optional match/round, so a failed batch can be replayed as is.
#[async_trait]
pub trait StatsRepository: Send + Sync {
    async fn upsert_players(&self, snapshots: &[PlayerSnapshot]) -> Result<(), RepositoryError>;

    async fn upsert_match_summaries(&self, snapshots: &[MatchSummarySnapshot]) -> Result<(), RepositoryError>;

    async fn upsert_weapon_stats(&self, snapshots: &[WeaponStatsSnapshot]) -> Result<(), RepositoryError>;

    async fn record_round_markers(&self, markers: &[RoundMarker]) -> Result<(), RepositoryError>;
}

#[derive(Default)]
struct Tables {
    players: HashMap<(PlayerId, Option<Uuid>), PlayerSnapshot>,
    matches: HashMap<Uuid, MatchSummarySnapshot>,
    weapons: HashMap<(PlayerId, Option<Uuid>, String), WeaponStatsSnapshot>,
    rounds: HashMap<(Uuid, u32, RoundPhase), RoundMarker>,
}

/// Process-local repository. Used by the replay binary and by tests; an
/// outage can be simulated with `set_available(false)`.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    calls: AtomicU64,
    rows_written: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::SeqCst)
    }

    pub fn player(&self, player_id: PlayerId, match_id: Option<Uuid>) -> Option<PlayerSnapshot> {
        self.tables.lock().players.get(&(player_id, match_id)).cloned()
    }

    pub fn players(&self) -> Vec<PlayerSnapshot> {
        let mut all: Vec<_> = self.tables.lock().players.values().cloned().collect();
        all.sort_by_key(|s| s.player_id);
        all
    }

    pub fn match_summary(&self, match_id: Uuid) -> Option<MatchSummarySnapshot> {
        self.tables.lock().matches.get(&match_id).cloned()
    }

    pub fn weapon_rows(&self) -> usize {
        self.tables.lock().weapons.len()
    }

    pub fn round_markers(&self) -> Vec<RoundMarker> {
        let mut all: Vec<_> = self.tables.lock().rounds.values().cloned().collect();
        all.sort_by_key(|m| (m.round_number, m.phase == RoundPhase::Ended));
        all
    }

    fn check(&self, rows: usize) -> Result<(), RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("simulated outage".into()));
        }
        self.rows_written.fetch_add(rows as u64, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl StatsRepository for InMemoryRepository {
    async fn upsert_players(&self, snapshots: &[PlayerSnapshot]) -> Result<(), RepositoryError> {
        self.check(snapshots.len())?;
        let mut tables = self.tables.lock();
        for snapshot in snapshots {
            tables.players.insert((snapshot.player_id, snapshot.match_id), snapshot.clone());
        }
        Ok(())
    }

    async fn upsert_match_summaries(&self, snapshots: &[MatchSummarySnapshot]) -> Result<(), RepositoryError> {
        self.check(snapshots.len())?;
        let mut tables = self.tables.lock();
        for snapshot in snapshots {
            tables.matches.insert(snapshot.match_id, snapshot.clone());
        }
        Ok(())
    }

    async fn upsert_weapon_stats(&self, snapshots: &[WeaponStatsSnapshot]) -> Result<(), RepositoryError> {
        self.check(snapshots.len())?;
        let mut tables = self.tables.lock();
        for snapshot in snapshots {
            tables
                .weapons
                .insert((snapshot.player_id, snapshot.match_id, snapshot.weapon.clone()), snapshot.clone());
        }
        Ok(())
    }

    async fn record_round_markers(&self, markers: &[RoundMarker]) -> Result<(), RepositoryError> {
        self.check(markers.len())?;
        let mut tables = self.tables.lock();
        for marker in markers {
            tables.rounds.insert((marker.match_id, marker.round_number, marker.phase), marker.clone());
        }
        Ok(())
    }
}
