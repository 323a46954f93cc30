// scrim_stats/server/src/systems/round_state.rs
use crate::core::types::{GameTime, PlayerId, Team, Vec3};
use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use tracing::trace;

/// A teammate of a fallen player who was close enough to answer the kill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOpportunity {
    pub victim: PlayerId,
    pub killer_team: Team,
    pub created_at: GameTime,
    pub expires_at: GameTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeamDeath {
    pub victim: PlayerId,
    pub time: GameTime,
    pub position: Option<Vec3>,
}

/// First cross-team engagement between human players in the round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryDuel {
    pub attacker: PlayerId,
    pub victim: PlayerId,
    pub time: GameTime,
}

/// A player left as the last one alive on their team.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClutchSituation {
    pub team: Team,
    pub enemies_alive: u32,
}

/// Ephemeral state for the round in progress. Everything is dropped by
/// `on_round_start`.
#[derive(Debug, Default)]
pub struct RoundStateTracker {
    round_number: u32,
    start_counts: (u32, u32),
    alive: AHashMap<PlayerId, Team>,
    spawned: AHashSet<PlayerId>,
    alive_counts: [u32; 2],
    last_team_death: [Option<TeamDeath>; 2],
    round_kills: AHashMap<PlayerId, u32>,
    pending_trades: AHashMap<PlayerId, SmallVec<[TradeOpportunity; 4]>>,
    positions: AHashMap<PlayerId, Vec3>,
    entry_duel: Option<EntryDuel>,
    entry_kill_taken: bool,
    clutches: AHashMap<PlayerId, ClutchSituation>,
}

impl RoundStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all per-round state and records the starting alive counts for
    /// ratio calculations. Live counters are rebuilt from spawns. Returns the
    /// number of trade opportunities that were never consumed.
    pub fn on_round_start(
        &mut self,
        round_number: u32,
        start_time: GameTime,
        ct_alive_at_start: u32,
        t_alive_at_start: u32,
    ) -> Vec<(PlayerId, u32)> {
        let missed = self.drain_unconsumed_trades();
        self.round_number = round_number;
        self.start_counts = (ct_alive_at_start, t_alive_at_start);
        self.alive.clear();
        self.spawned.clear();
        self.alive_counts = [0, 0];
        self.last_team_death = [None, None];
        self.round_kills.clear();
        self.pending_trades.clear();
        self.positions.clear();
        self.entry_duel = None;
        self.entry_kill_taken = false;
        self.clutches.clear();
        trace!("Round {} state reset at t={}", round_number, start_time);
        missed
    }

    /// Marks the player alive on `team`. Duplicate spawns are ignored; a spawn
    /// on a different team moves the player between counters.
    pub fn record_spawn(&mut self, player_id: PlayerId, team: Team) -> bool {
        let Some(slot) = team.index() else {
            return false;
        };
        self.spawned.insert(player_id);
        match self.alive.insert(player_id, team) {
            Some(previous) if previous == team => false,
            Some(previous) => {
                if let Some(old_slot) = previous.index() {
                    self.alive_counts[old_slot] = self.alive_counts[old_slot].saturating_sub(1);
                }
                self.alive_counts[slot] += 1;
                true
            }
            None => {
                self.alive_counts[slot] += 1;
                true
            }
        }
    }

    /// Removes the player from the alive set and stamps the team death time.
    /// Deaths of players that are not alive leave the counters untouched.
    pub fn record_death(&mut self, player_id: PlayerId, team: Team, timestamp: GameTime) -> bool {
        let Some(alive_team) = self.alive.remove(&player_id) else {
            return false;
        };
        if let Some(slot) = alive_team.index() {
            self.alive_counts[slot] = self.alive_counts[slot].saturating_sub(1);
        }
        let team = if team.is_playing() { team } else { alive_team };
        if let Some(slot) = team.index() {
            self.last_team_death[slot] = Some(TeamDeath {
                victim: player_id,
                time: timestamp,
                position: self.positions.get(&player_id).copied(),
            });
        }
        true
    }

    /// Drops a player that left mid-round without stamping a team death.
    /// Returns the trade opportunities they still held.
    pub fn forget_player(&mut self, player_id: PlayerId) -> u32 {
        if let Some(team) = self.alive.remove(&player_id) {
            if let Some(slot) = team.index() {
                self.alive_counts[slot] = self.alive_counts[slot].saturating_sub(1);
            }
        }
        self.positions.remove(&player_id);
        self.round_kills.remove(&player_id);
        self.discard_trades_of(player_id)
    }

    /// The single alive player of `team`, if exactly one is left.
    pub fn lone_survivor(&self, team: Team) -> Option<PlayerId> {
        if self.alive_on(team) != 1 {
            return None;
        }
        self.alive.iter().find(|(_, t)| **t == team).map(|(id, _)| *id)
    }

    /// Alive players as (ct, t). Read straight from the counters.
    pub fn get_alive_counts(&self) -> (u32, u32) {
        (self.alive_counts[0], self.alive_counts[1])
    }

    pub fn alive_on(&self, team: Team) -> u32 {
        team.index().map_or(0, |slot| self.alive_counts[slot])
    }

    pub fn is_alive(&self, player_id: PlayerId) -> bool {
        self.alive.contains_key(&player_id)
    }

    /// Whether the player took part in this round, dead or alive.
    pub fn has_spawned(&self, player_id: PlayerId) -> bool {
        self.spawned.contains(&player_id)
    }

    pub fn alive_team_of(&self, player_id: PlayerId) -> Option<Team> {
        self.alive.get(&player_id).copied()
    }

    pub fn alive_players(&self) -> impl Iterator<Item = (PlayerId, Team)> + '_ {
        self.alive.iter().map(|(id, team)| (*id, *team))
    }

    pub fn alive_teammates(&self, team: Team, excluding: PlayerId) -> Vec<PlayerId> {
        self.alive
            .iter()
            .filter(|(id, t)| **t == team && **id != excluding)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    /// Roster sizes per team when the round began, as (ct, t).
    pub fn start_counts(&self) -> (u32, u32) {
        self.start_counts
    }

    pub fn last_team_death(&self, team: Team) -> Option<TeamDeath> {
        team.index().and_then(|slot| self.last_team_death[slot])
    }

    pub fn set_position(&mut self, player_id: PlayerId, position: Vec3) {
        if position.is_finite() {
            self.positions.insert(player_id, position);
        }
    }

    pub fn position(&self, player_id: PlayerId) -> Option<Vec3> {
        self.positions.get(&player_id).copied()
    }

    /// Bumps and returns the killer's kill count for this round.
    pub fn increment_round_kills(&mut self, killer: PlayerId) -> u32 {
        let count = self.round_kills.entry(killer).or_insert(0);
        *count += 1;
        *count
    }

    pub fn round_kills(&self, player_id: PlayerId) -> u32 {
        self.round_kills.get(&player_id).copied().unwrap_or(0)
    }

    pub fn add_trade_opportunity(&mut self, holder: PlayerId, opportunity: TradeOpportunity) {
        self.pending_trades.entry(holder).or_default().push(opportunity);
    }

    pub fn pending_trades(&self, holder: PlayerId) -> &[TradeOpportunity] {
        self.pending_trades.get(&holder).map(|list| list.as_slice()).unwrap_or(&[])
    }

    /// Takes the oldest live opportunity of `holder` that answers a kill made
    /// by `enemy_team`, created strictly before `now`.
    pub fn consume_trade_opportunity(
        &mut self,
        holder: PlayerId,
        enemy_team: Team,
        now: GameTime,
    ) -> Option<TradeOpportunity> {
        let list = self.pending_trades.get_mut(&holder)?;
        let idx = list.iter().position(|op| {
            op.killer_team == enemy_team && op.created_at < now && now <= op.expires_at && op.victim != holder
        })?;
        let opportunity = list.remove(idx);
        if list.is_empty() {
            self.pending_trades.remove(&holder);
        }
        Some(opportunity)
    }

    /// Drops opportunities of a holder that can no longer act (they died).
    /// Returns how many were pending.
    pub fn discard_trades_of(&mut self, holder: PlayerId) -> u32 {
        self.pending_trades.remove(&holder).map_or(0, |list| list.len() as u32)
    }

    /// Removes every opportunity whose expiry lies before `now`, grouped per
    /// holder as missed trade windows.
    pub fn expire_trade_windows(&mut self, now: GameTime) -> Vec<(PlayerId, u32)> {
        let mut missed = Vec::new();
        self.pending_trades.retain(|holder, list| {
            let before = list.len();
            list.retain(|op| op.expires_at >= now);
            let expired = (before - list.len()) as u32;
            if expired > 0 {
                missed.push((*holder, expired));
            }
            !list.is_empty()
        });
        missed
    }

    /// Empties the opportunity table, returning everything left unconsumed.
    pub fn drain_unconsumed_trades(&mut self) -> Vec<(PlayerId, u32)> {
        self.pending_trades
            .drain()
            .filter(|(_, list)| !list.is_empty())
            .map(|(holder, list)| (holder, list.len() as u32))
            .collect()
    }

    /// Records the entry duel once per round. Returns `true` when this call set it.
    pub fn mark_entry_duel(&mut self, attacker: PlayerId, victim: PlayerId, time: GameTime) -> bool {
        if self.entry_duel.is_some() {
            return false;
        }
        self.entry_duel = Some(EntryDuel { attacker, victim, time });
        true
    }

    pub fn entry_duel(&self) -> Option<EntryDuel> {
        self.entry_duel
    }

    /// Claims the round's entry kill. Only the first caller gets `true`.
    pub fn claim_entry_kill(&mut self) -> bool {
        if self.entry_kill_taken {
            return false;
        }
        self.entry_kill_taken = true;
        true
    }

    pub fn entry_kill_taken(&self) -> bool {
        self.entry_kill_taken
    }

    pub fn record_clutch(&mut self, player_id: PlayerId, situation: ClutchSituation) -> bool {
        if self.clutches.contains_key(&player_id) {
            return false;
        }
        self.clutches.insert(player_id, situation);
        true
    }

    pub fn clutch_of(&self, player_id: PlayerId) -> Option<ClutchSituation> {
        self.clutches.get(&player_id).copied()
    }

    pub fn clutches(&self) -> impl Iterator<Item = (PlayerId, ClutchSituation)> + '_ {
        self.clutches.iter().map(|(id, situation)| (*id, *situation))
    }
}
