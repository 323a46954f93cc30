// scrim_stats/server/src/server/mod.rs
pub mod event_loop;
pub mod instance;
