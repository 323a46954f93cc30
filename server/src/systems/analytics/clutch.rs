// scrim_stats/server/src/systems/analytics/clutch.rs
use crate::core::config::AnalyticsConfig;
use crate::core::types::{PlayerId, Team};
use crate::systems::round_state::{ClutchSituation, RoundStateTracker};
use smallvec::SmallVec;

const PLAYING_TEAMS: [Team; 2] = [Team::CounterTerrorist, Team::Terrorist];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClutchOutcome {
    Won { points: f64 },
    Lost,
}

/// Records a clutch for every team reduced to one player while the other
/// team still has someone alive. Returns the players newly in a clutch.
pub fn detect_clutches(round: &mut RoundStateTracker) -> SmallVec<[PlayerId; 2]> {
    let mut started = SmallVec::new();
    for team in PLAYING_TEAMS {
        let Some(opponent) = team.opponent() else { continue };
        let enemies_alive = round.alive_on(opponent);
        if enemies_alive == 0 {
            continue;
        }
        if let Some(survivor) = round.lone_survivor(team) {
            if round.record_clutch(survivor, ClutchSituation { team, enemies_alive }) {
                started.push(survivor);
            }
        }
    }
    started
}

/// Harder clutches, against more enemies, are worth more.
pub fn clutch_points(config: &AnalyticsConfig, enemies_alive: u32) -> f64 {
    config.clutch_base_points + enemies_alive as f64 * config.clutch_difficulty_weight
}

pub fn resolve(config: &AnalyticsConfig, situation: &ClutchSituation, winner: Team) -> ClutchOutcome {
    if situation.team == winner {
        ClutchOutcome::Won { points: clutch_points(config, situation.enemies_alive) }
    } else {
        ClutchOutcome::Lost
    }
}
