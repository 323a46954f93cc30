// scrim_stats/server/src/systems/mod.rs
pub mod analytics;
pub mod round_state;
pub mod snapshot;
