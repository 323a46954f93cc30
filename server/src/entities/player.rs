// scrim_stats/server/src/entities/player.rs
use crate::core::types::{PlayerId, Team, Vec3};
use crate::entities::accumulator::PlayerAccumulator;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_SESSION_SHARDS: usize = 16;

type SharedAccumulator = Arc<Mutex<PlayerAccumulator>>;

/// Concurrent store of per-player accumulators.
///
/// Each accumulator sits behind its own mutex, so mutations of one player are
/// serialized while different players mutate in parallel. Shard maps are only
/// touched long enough to clone the accumulator handle out, which keeps
/// cross-player scans from ever waiting on a single player's lock holder.
pub struct PlayerSessionStore {
    shards: Vec<Arc<DashMap<PlayerId, SharedAccumulator>>>,
    num_shards: usize,
}

impl PlayerSessionStore {
    pub fn new(num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        let mut shards = Vec::with_capacity(num_shards);
        for _ in 0..num_shards {
            shards.push(Arc::new(DashMap::new()));
        }
        PlayerSessionStore { shards, num_shards }
    }

    fn shard(&self, player_id: PlayerId) -> &DashMap<PlayerId, SharedAccumulator> {
        let idx = (seahash::hash(&player_id.get().to_le_bytes()) % self.num_shards as u64) as usize;
        &self.shards[idx]
    }

    fn handle(&self, player_id: PlayerId) -> Option<SharedAccumulator> {
        self.shard(player_id).get(&player_id).map(|entry| entry.value().clone())
    }

    /// Creates the accumulator on first sighting. Returns `true` when a new
    /// entry was created; an existing entry only has its name refreshed.
    pub fn register(&self, player_id: PlayerId, name: &str) -> bool {
        let shard = self.shard(player_id);
        if let Some(existing) = shard.get(&player_id) {
            let mut acc = existing.value().lock();
            if acc.name != name && !name.is_empty() {
                acc.name = name.to_string();
            }
            return false;
        }
        let created = shard
            .entry(player_id)
            .or_insert_with(|| Arc::new(Mutex::new(PlayerAccumulator::new(player_id, name.to_string()))));
        drop(created);
        debug!("Registered session for player {}", player_id);
        true
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.shard(player_id).contains_key(&player_id)
    }

    /// Runs `func` against the player's accumulator under its per-player lock.
    /// Returns `None` when the player has no session.
    pub fn mutate<R, F>(&self, player_id: PlayerId, func: F) -> Option<R>
    where
        F: FnOnce(&mut PlayerAccumulator) -> R,
    {
        let handle = self.handle(player_id)?;
        let mut acc = handle.lock();
        Some(func(&mut acc))
    }

    /// Point-in-time copy of the player's accumulator.
    pub fn snapshot(&self, player_id: PlayerId) -> Option<PlayerAccumulator> {
        self.handle(player_id).map(|handle| handle.lock().clone())
    }

    /// Removes the session and hands back its final state. A second call for
    /// the same player returns `None`.
    pub fn remove(&self, player_id: PlayerId) -> Option<PlayerAccumulator> {
        let (_, handle) = self.shard(player_id).remove(&player_id)?;
        let final_state = match Arc::try_unwrap(handle) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().clone(),
        };
        Some(final_state)
    }

    pub fn record_position(&self, player_id: PlayerId, position: Vec3) -> bool {
        if !position.is_finite() {
            warn!("Ignoring non-finite position for player {}", player_id);
            return false;
        }
        self.mutate(player_id, |acc| acc.record_position(position)).is_some()
    }

    pub fn last_position(&self, player_id: PlayerId) -> Option<Vec3> {
        self.mutate(player_id, |acc| acc.last_known_position).flatten()
    }

    pub fn team_of(&self, player_id: PlayerId) -> Option<Team> {
        self.mutate(player_id, |acc| acc.current_team)
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        let mut ids = Vec::with_capacity(self.player_count());
        for shard in &self.shards {
            for entry in shard.iter() {
                ids.push(*entry.key());
            }
        }
        ids.sort_unstable();
        ids
    }

    /// Visits every accumulator, locking one player at a time.
    pub fn for_each_mut<F>(&self, mut func: F)
    where
        F: FnMut(&mut PlayerAccumulator),
    {
        let handles: Vec<SharedAccumulator> = self
            .shards
            .iter()
            .flat_map(|shard| shard.iter().map(|entry| entry.value().clone()).collect::<Vec<_>>())
            .collect();
        for handle in handles {
            func(&mut handle.lock());
        }
    }

    pub fn player_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.player_count() == 0
    }
}

impl Default for PlayerSessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_SHARDS)
    }
}
