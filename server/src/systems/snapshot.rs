// scrim_stats/server/src/systems/snapshot.rs
use crate::core::constants::*;
use crate::core::types::{GameTime, PlayerId, Team};
use crate::entities::accumulator::{MultiKillCounts, PlayerAccumulator};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Correlation data stamped onto every snapshot of one flush.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotContext {
    pub match_id: Option<Uuid>,
    pub round_number: Option<u32>,
    pub captured_at_ms: u64,
}

impl SnapshotContext {
    pub fn now(match_id: Option<Uuid>, round_number: Option<u32>) -> Self {
        SnapshotContext { match_id, round_number, captured_at_ms: unix_millis() }
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Immutable, fully derived view of one player's accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: PlayerId,
    pub name: String,
    pub team: Team,
    pub match_id: Option<Uuid>,
    pub round_number: Option<u32>,
    pub captured_at_ms: u64,

    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub headshot_kills: u32,
    pub wallbang_kills: u32,
    pub blind_kills: u32,
    pub team_kills: u32,
    pub damage_dealt: u64,
    pub damage_taken: u64,
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

    pub kd_ratio: f64,
    pub headshot_pct: f64,
    pub adr: f64,
    pub kast_pct: f64,
    pub kills_per_round: f64,
    pub survival_rate: f64,
    pub impact: f64,
    pub rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponStatsSnapshot {
    pub player_id: PlayerId,
    pub match_id: Option<Uuid>,
    pub weapon: String,
    pub kills: u32,
    pub headshot_kills: u32,
    pub damage: u64,
    pub shots_fired: u32,
    pub captured_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummarySnapshot {
    pub match_id: Uuid,
    pub map_name: Option<String>,
    pub rounds_played: u32,
    pub ct_score: u32,
    pub t_score: u32,
    pub winner: Option<Team>,
    pub finished: bool,
    pub captured_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundPhase {
    Started,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundMarker {
    pub match_id: Uuid,
    pub round_number: u32,
    pub phase: RoundPhase,
    pub time: GameTime,
    pub winner: Option<Team>,
    pub reason: Option<String>,
    pub ct_alive: u32,
    pub t_alive: u32,
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

/// Per-round impact sub-score: multi-kills, clutch points, entry kills and MVPs.
pub fn impact_score(acc: &PlayerAccumulator) -> f64 {
    let mk = &acc.multi_kills;
    let points = mk.doubles as f64 * IMPACT_DOUBLE_KILL
        + mk.triples as f64 * IMPACT_TRIPLE_KILL
        + mk.quads as f64 * IMPACT_QUAD_KILL
        + mk.aces as f64 * IMPACT_ACE
        + acc.clutch_points
        + acc.entry_kills as f64 * IMPACT_ENTRY_KILL
        + acc.mvps as f64 * IMPACT_MVP;
    safe_div(points, acc.rounds_played as f64)
}

/// Reduces an accumulator to an immutable snapshot. Zero rounds played yields
/// zero for every per-round figure.
pub fn assemble(acc: &PlayerAccumulator, context: SnapshotContext) -> PlayerSnapshot {
    let rounds = acc.rounds_played as f64;
    let kills_per_round = safe_div(acc.kills as f64, rounds);
    let survival_rate = safe_div(acc.rounds_played.saturating_sub(acc.deaths) as f64, rounds);
    let kast_fraction = safe_div(acc.kast_rounds as f64, rounds);
    let impact = impact_score(acc);
    let rating = if acc.rounds_played == 0 {
        0.0
    } else {
        RATING_WEIGHT_KILL * kills_per_round
            + RATING_WEIGHT_SURVIVAL * survival_rate
            + RATING_WEIGHT_IMPACT * impact
            + RATING_WEIGHT_KAST * kast_fraction
    };

    PlayerSnapshot {
        player_id: acc.player_id,
        name: acc.name.clone(),
        team: acc.current_team,
        match_id: context.match_id,
        round_number: context.round_number,
        captured_at_ms: context.captured_at_ms,

        kills: acc.kills,
        deaths: acc.deaths,
        assists: acc.assists,
        headshot_kills: acc.headshot_kills,
        wallbang_kills: acc.wallbang_kills,
        blind_kills: acc.blind_kills,
        team_kills: acc.team_kills,
        damage_dealt: acc.damage_dealt,
        damage_taken: acc.damage_taken,
        utility_damage: acc.utility_damage,
        enemies_flashed: acc.enemies_flashed,
        flash_assists: acc.flash_assists,
        grenades_thrown: acc.grenades_thrown,
        shots_fired: acc.shots_fired,
        bomb_plants: acc.bomb_plants,
        bomb_defuses: acc.bomb_defuses,
        money_spent: acc.money_spent,
        mvps: acc.mvps,
        rounds_played: acc.rounds_played,
        kast_rounds: acc.kast_rounds,
        trade_kills: acc.trade_kills,
        traded_deaths: acc.traded_deaths,
        missed_trade_windows: acc.missed_trade_windows,
        revenge_kills: acc.revenge_kills,
        entry_engagements: acc.entry_engagements,
        entry_engagements_received: acc.entry_engagements_received,
        entry_kills: acc.entry_kills,
        entry_deaths: acc.entry_deaths,
        clutch_wins: acc.clutch_wins,
        clutch_losses: acc.clutch_losses,
        clutch_points: acc.clutch_points,
        multi_kills: acc.multi_kills,
        high_impact_kills: acc.high_impact_kills,
        low_impact_kills: acc.low_impact_kills,
        distance_travelled: acc.distance_travelled,

        kd_ratio: acc.kills as f64 / acc.deaths.max(1) as f64,
        headshot_pct: safe_div(acc.headshot_kills as f64, acc.kills as f64) * 100.0,
        adr: safe_div(acc.damage_dealt as f64, rounds),
        kast_pct: kast_fraction * 100.0,
        kills_per_round,
        survival_rate,
        impact,
        rating,
    }
}

/// One snapshot per weapon the player has touched.
pub fn assemble_weapons(acc: &PlayerAccumulator, context: SnapshotContext) -> Vec<WeaponStatsSnapshot> {
    acc.weapons
        .iter()
        .map(|(weapon, tally)| WeaponStatsSnapshot {
            player_id: acc.player_id,
            match_id: context.match_id,
            weapon: weapon.clone(),
            kills: tally.kills,
            headshot_kills: tally.headshot_kills,
            damage: tally.damage,
            shots_fired: tally.shots_fired,
            captured_at_ms: context.captured_at_ms,
        })
        .collect()
}
