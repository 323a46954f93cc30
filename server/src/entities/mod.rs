// scrim_stats/server/src/entities/mod.rs
pub mod accumulator;
pub mod player;
