// scrim_stats/server/src/core/error.rs
use crate::persistence::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Unknown player: {0}")]
    UnknownPlayer(u64),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StatsResult<T> = Result<T, StatsError>;
