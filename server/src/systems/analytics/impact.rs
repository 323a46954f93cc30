// scrim_stats/server/src/systems/analytics/impact.rs
use crate::core::config::AnalyticsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillImpact {
    High,
    Low,
    Normal,
}

/// Context of a kill for impact classification. Alive counts are taken
/// before the victim is removed.
#[derive(Debug, Clone, Copy)]
pub struct ImpactInputs {
    pub round_kills: u32,
    pub entry_kill: bool,
    pub clutch_kill: bool,
    pub own_alive: u32,
    pub enemy_alive: u32,
}

pub fn classify(config: &AnalyticsConfig, inputs: &ImpactInputs) -> KillImpact {
    if inputs.round_kills >= config.high_impact_kill_threshold || inputs.clutch_kill || inputs.entry_kill {
        return KillImpact::High;
    }
    let outnumbering = inputs.own_alive >= inputs.enemy_alive.saturating_add(config.low_impact_margin);
    if outnumbering && inputs.round_kills <= config.max_kill_count_for_low_impact {
        return KillImpact::Low;
    }
    KillImpact::Normal
}
