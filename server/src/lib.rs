// scrim_stats/server/src/lib.rs
pub mod concurrent;
pub mod core;
pub mod entities;
pub mod operational;
pub mod persistence;
pub mod server;
pub mod systems;

pub use crate::core::config::ServerConfig;
pub use crate::core::types::{GameEvent, PlayerId, Team};
pub use crate::persistence::{InMemoryRepository, StatsRepository};
pub use crate::server::instance::StatsServer;
