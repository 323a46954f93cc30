// scrim_stats/server/src/operational/mod.rs
pub mod monitoring;
