// scrim_stats/server/src/concurrent/mod.rs
pub mod task_supervisor;
pub mod update_queue;
