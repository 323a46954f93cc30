// scrim_stats/server/src/systems/analytics/trade.rs
use crate::core::config::AnalyticsConfig;
use crate::core::types::{GameTime, PlayerId, Team, Vec3};
use crate::systems::round_state::{RoundStateTracker, TeamDeath, TradeOpportunity};

/// What a kill answered, if anything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeCredit {
    /// The killer held an opportunity opened when `original_victim`, a
    /// teammate, died nearby.
    Avenged { original_victim: PlayerId },
    /// The victim's team lost a player within the window just before, close
    /// to the killer; the victim is counted as traded.
    FollowUp { victim: PlayerId },
}

#[derive(Debug, Clone, Copy)]
pub struct KillFacts {
    pub time: GameTime,
    pub killer: PlayerId,
    pub killer_team: Team,
    pub killer_position: Option<Vec3>,
    pub victim: PlayerId,
    pub victim_team: Team,
    pub victim_position: Option<Vec3>,
}

fn within(config: &AnalyticsConfig, a: Option<Vec3>, b: Option<Vec3>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.distance(&b) <= config.trade_proximity_units,
        _ => false,
    }
}

/// Decides whether `kill` is a trade. `prior_death` is the victim team's last
/// death as it stood before this kill. At most one credit is returned.
pub fn classify_trade(
    round: &mut RoundStateTracker,
    config: &AnalyticsConfig,
    kill: &KillFacts,
    prior_death: Option<TeamDeath>,
) -> Option<TradeCredit> {
    if let Some(opportunity) = round.consume_trade_opportunity(kill.killer, kill.victim_team, kill.time) {
        return Some(TradeCredit::Avenged { original_victim: opportunity.victim });
    }

    let prior = prior_death?;
    // Tick-quantized timestamps: a death at the same instant is never traded.
    let strictly_before = prior.time < kill.time;
    let in_window = kill.time - prior.time <= config.trade_window_secs;
    let not_own = prior.victim != kill.killer && prior.victim != kill.victim;
    if strictly_before && in_window && not_own && within(config, kill.killer_position, prior.position) {
        return Some(TradeCredit::FollowUp { victim: kill.victim });
    }
    None
}

/// Opens a trade window for every surviving teammate of the victim standing
/// within the proximity threshold. Returns how many were opened.
pub fn open_trade_windows(round: &mut RoundStateTracker, config: &AnalyticsConfig, kill: &KillFacts) -> usize {
    let Some(death_position) = kill.victim_position else {
        return 0;
    };
    let holders: Vec<PlayerId> = round
        .alive_teammates(kill.victim_team, kill.victim)
        .into_iter()
        .filter(|mate| within(config, round.position(*mate), Some(death_position)))
        .collect();

    for holder in &holders {
        round.add_trade_opportunity(
            *holder,
            TradeOpportunity {
                victim: kill.victim,
                killer_team: kill.killer_team,
                created_at: kill.time,
                expires_at: kill.time + config.trade_window_secs,
            },
        );
    }
    holders.len()
}
