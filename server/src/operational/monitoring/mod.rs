// scrim_stats/server/src/operational/monitoring/mod.rs
pub mod metrics;
