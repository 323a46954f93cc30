// scrim_stats/server/src/entities/accumulator.rs
use crate::core::constants::{ACE_KILLS, MULTI_KILL_MIN};
use crate::core::types::{PlayerId, Team, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MultiKillTier {
    Double,
    Triple,
    Quad,
    Ace,
}

impl MultiKillTier {
    pub fn for_round_kills(kills: u32) -> Option<Self> {
        match kills {
            k if k < MULTI_KILL_MIN => None,
            k if k >= ACE_KILLS => Some(MultiKillTier::Ace),
            2 => Some(MultiKillTier::Double),
            3 => Some(MultiKillTier::Triple),
            _ => Some(MultiKillTier::Quad),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiKillCounts {
    pub doubles: u32,
    pub triples: u32,
    pub quads: u32,
    pub aces: u32,
}

impl MultiKillCounts {
    pub fn record(&mut self, tier: MultiKillTier) {
        match tier {
            MultiKillTier::Double => self.doubles += 1,
            MultiKillTier::Triple => self.triples += 1,
            MultiKillTier::Quad => self.quads += 1,
            MultiKillTier::Ace => self.aces += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.doubles + self.triples + self.quads + self.aces
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponTally {
    pub kills: u32,
    pub headshot_kills: u32,
    pub damage: u64,
    pub shots_fired: u32,
}

/// Flags that only describe the round in progress. Reset by `begin_round`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundFlags {
    pub had_kill_this_round: bool,
    pub had_assist_this_round: bool,
    pub survived_this_round: bool,
    pub did_trade_this_round: bool,
    pub was_traded_this_round: bool,
    pub round_kills: u32,
    pub round_damage: u64,
}

impl RoundFlags {
    pub fn counts_for_kast(&self) -> bool {
        self.had_kill_this_round
            || self.had_assist_this_round
            || self.survived_this_round
            || self.was_traded_this_round
    }
}

/// Mutable per-player totals. Counters only ever grow; `round` is the
/// transient per-round part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerAccumulator {
    pub player_id: PlayerId,
    pub name: String,
    pub current_team: Team,

    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub headshot_kills: u32,
    pub wallbang_kills: u32,
    pub blind_kills: u32,
    pub no_scope_kills: u32,
    pub smoke_kills: u32,
    pub team_kills: u32,

    pub damage_dealt: u64,
    pub damage_taken: u64,
    pub team_damage: u64,
    pub utility_damage: u64,

    pub enemies_flashed: u32,
    pub flash_assists: u32,
    pub grenades_thrown: u32,
    pub shots_fired: u32,

    pub bomb_plants: u32,
    pub bomb_defuses: u32,
    pub money_spent: u64,
    pub mvps: u32,

    pub rounds_played: u32,
    pub kast_rounds: u32,

    pub trade_kills: u32,
    pub traded_deaths: u32,
    pub missed_trade_windows: u32,
    pub revenge_kills: u32,
    pub entry_engagements: u32,
    pub entry_engagements_received: u32,
    pub entry_kills: u32,
    pub entry_deaths: u32,
    pub clutch_wins: u32,
    pub clutch_losses: u32,
    pub clutch_points: f64,
    pub multi_kills: MultiKillCounts,
    pub high_impact_kills: u32,
    pub low_impact_kills: u32,

    pub distance_travelled: f64,
    pub last_known_position: Option<Vec3>,

    pub weapons: BTreeMap<String, WeaponTally>,
    pub round: RoundFlags,
}

impl PlayerAccumulator {
    pub fn new(player_id: PlayerId, name: String) -> Self {
        PlayerAccumulator {
            player_id,
            name,
            current_team: Team::Unassigned,
            kills: 0,
            deaths: 0,
            assists: 0,
            headshot_kills: 0,
            wallbang_kills: 0,
            blind_kills: 0,
            no_scope_kills: 0,
            smoke_kills: 0,
            team_kills: 0,
            damage_dealt: 0,
            damage_taken: 0,
            team_damage: 0,
            utility_damage: 0,
            enemies_flashed: 0,
            flash_assists: 0,
            grenades_thrown: 0,
            shots_fired: 0,
            bomb_plants: 0,
            bomb_defuses: 0,
            money_spent: 0,
            mvps: 0,
            rounds_played: 0,
            kast_rounds: 0,
            trade_kills: 0,
            traded_deaths: 0,
            missed_trade_windows: 0,
            revenge_kills: 0,
            entry_engagements: 0,
            entry_engagements_received: 0,
            entry_kills: 0,
            entry_deaths: 0,
            clutch_wins: 0,
            clutch_losses: 0,
            clutch_points: 0.0,
            multi_kills: MultiKillCounts::default(),
            high_impact_kills: 0,
            low_impact_kills: 0,
            distance_travelled: 0.0,
            last_known_position: None,
            weapons: BTreeMap::new(),
            round: RoundFlags::default(),
        }
    }

    /// Starts a new match for this player: identity and team survive, every
    /// total goes back to zero.
    pub fn reset_totals(&mut self) {
        let mut fresh = PlayerAccumulator::new(self.player_id, std::mem::take(&mut self.name));
        fresh.current_team = self.current_team;
        fresh.last_known_position = self.last_known_position;
        *self = fresh;
    }

    pub fn begin_round(&mut self) {
        self.round = RoundFlags::default();
    }

    /// Closes the current round: counts it as played and credits KAST.
    /// Returns whether the round counted for KAST.
    pub fn finish_round(&mut self, survived: bool) -> bool {
        self.round.survived_this_round = survived;
        self.rounds_played += 1;
        let kast = self.round.counts_for_kast();
        if kast {
            self.kast_rounds += 1;
        }
        if let Some(tier) = MultiKillTier::for_round_kills(self.round.round_kills) {
            self.multi_kills.record(tier);
        }
        kast
    }

    pub fn weapon_mut(&mut self, weapon: &str) -> &mut WeaponTally {
        self.weapons.entry(weapon.to_string()).or_default()
    }

    pub fn record_kill(&mut self, weapon: &str, headshot: bool) {
        self.kills += 1;
        self.round.had_kill_this_round = true;
        self.round.round_kills += 1;
        if headshot {
            self.headshot_kills += 1;
        }
        let tally = self.weapon_mut(weapon);
        tally.kills += 1;
        if headshot {
            tally.headshot_kills += 1;
        }
    }

    pub fn record_damage(&mut self, weapon: &str, damage: u32, is_utility: bool) {
        let damage = damage as u64;
        self.damage_dealt += damage;
        self.round.round_damage += damage;
        if is_utility {
            self.utility_damage += damage;
        }
        self.weapon_mut(weapon).damage += damage;
    }

    pub fn record_position(&mut self, position: Vec3) {
        if let Some(previous) = self.last_known_position {
            self.distance_travelled += previous.distance(&position) as f64;
        }
        self.last_known_position = Some(position);
    }
}
