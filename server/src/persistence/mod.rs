// scrim_stats/server/src/persistence/mod.rs
pub mod circuit_breaker;
pub mod failed_buffer;
pub mod pipeline;
pub mod recovery;
pub mod repository;
pub mod retry;

use crate::core::types::PlayerId;
use crate::systems::snapshot::{
    MatchSummarySnapshot, PlayerSnapshot, RoundMarker, RoundPhase, WeaponStatsSnapshot,
};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use pipeline::{EnqueueOutcome, PersistencePipeline, PipelineHandle, PipelineStatsSnapshot, ShutdownReport};
pub use repository::{InMemoryRepository, RepositoryError, StatsRepository};

/// Everything the pipeline knows how to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PersistenceUpdate {
    PlayerStats(PlayerSnapshot),
    MatchSummary(MatchSummarySnapshot),
    WeaponStats(WeaponStatsSnapshot),
    RoundLifecycle(RoundMarker),
}

/// Identity of the row an update overwrites. Two updates with the same key in
/// one batch collapse to the later one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdateKey {
    Player { player_id: PlayerId, match_id: Option<Uuid> },
    Match(Uuid),
    Weapon { player_id: PlayerId, match_id: Option<Uuid>, weapon: String },
    Round { match_id: Uuid, round_number: u32, phase: RoundPhase },
}

impl PersistenceUpdate {
    pub fn key(&self) -> UpdateKey {
        match self {
            PersistenceUpdate::PlayerStats(s) => UpdateKey::Player { player_id: s.player_id, match_id: s.match_id },
            PersistenceUpdate::MatchSummary(s) => UpdateKey::Match(s.match_id),
            PersistenceUpdate::WeaponStats(s) => UpdateKey::Weapon {
                player_id: s.player_id,
                match_id: s.match_id,
                weapon: s.weapon.clone(),
            },
            PersistenceUpdate::RoundLifecycle(m) => UpdateKey::Round {
                match_id: m.match_id,
                round_number: m.round_number,
                phase: m.phase,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceUpdate::PlayerStats(_) => "player_stats",
            PersistenceUpdate::MatchSummary(_) => "match_summary",
            PersistenceUpdate::WeaponStats(_) => "weapon_stats",
            PersistenceUpdate::RoundLifecycle(_) => "round_lifecycle",
        }
    }

    /// Serialized size, used to bound the failed-batch buffer.
    pub fn estimated_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(512)
    }
}

/// Collapses updates sharing a key, keeping the last value in the slot of the
/// first occurrence.
pub fn coalesce(updates: Vec<PersistenceUpdate>) -> Vec<PersistenceUpdate> {
    let mut slots: AHashMap<UpdateKey, usize> = AHashMap::with_capacity(updates.len());
    let mut out: Vec<PersistenceUpdate> = Vec::with_capacity(updates.len());
    for update in updates {
        match slots.get(&update.key()) {
            Some(&idx) => out[idx] = update,
            None => {
                slots.insert(update.key(), out.len());
                out.push(update);
            }
        }
    }
    out
}

/// A batch split by target table.
#[derive(Debug, Default)]
pub struct GroupedBatch {
    pub players: Vec<PlayerSnapshot>,
    pub matches: Vec<MatchSummarySnapshot>,
    pub weapons: Vec<WeaponStatsSnapshot>,
    pub rounds: Vec<RoundMarker>,
}

impl GroupedBatch {
    pub fn from_updates(updates: &[PersistenceUpdate]) -> Self {
        let mut grouped = GroupedBatch::default();
        for update in updates {
            match update {
                PersistenceUpdate::PlayerStats(s) => grouped.players.push(s.clone()),
                PersistenceUpdate::MatchSummary(s) => grouped.matches.push(s.clone()),
                PersistenceUpdate::WeaponStats(s) => grouped.weapons.push(s.clone()),
                PersistenceUpdate::RoundLifecycle(m) => grouped.rounds.push(m.clone()),
            }
        }
        grouped
    }
}
