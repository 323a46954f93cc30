// scrim_stats/server/src/persistence/recovery.rs
use super::PersistenceUpdate;
use crate::core::error::{StatsError, StatsResult};
use crate::systems::snapshot::unix_millis;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const RECOVERY_FORMAT_VERSION: u32 = 1;
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Serialize, Deserialize)]
struct RecoveryFile {
    version: u32,
    written_at_ms: u64,
    updates: Vec<PersistenceUpdate>,
}

#[derive(Debug)]
pub enum RecoveryOutcome {
    Missing,
    Stale { age: Duration, discarded: usize },
    Loaded(Vec<PersistenceUpdate>),
}

/// Writes pending updates as zstd-compressed JSON. The file is replaced
/// atomically through a sibling temp file; an empty set removes the file.
pub fn write_checkpoint(path: &Path, updates: &[PersistenceUpdate]) -> StatsResult<()> {
    if updates.is_empty() {
        return remove_checkpoint(path);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = RecoveryFile {
        version: RECOVERY_FORMAT_VERSION,
        written_at_ms: unix_millis(),
        updates: updates.to_vec(),
    };
    let json = serde_json::to_vec(&file)?;
    let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, compressed)?;
    std::fs::rename(&tmp, path)?;
    debug!("Checkpointed {} pending updates to {}", updates.len(), path.display());
    Ok(())
}

pub fn remove_checkpoint(path: &Path) -> StatsResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Reads a checkpoint left by a previous process. Files older than `max_age`
/// are deleted instead of replayed.
pub fn load_checkpoint(path: &Path, max_age: Duration) -> StatsResult<RecoveryOutcome> {
    let compressed = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RecoveryOutcome::Missing),
        Err(e) => return Err(e.into()),
    };
    let json = zstd::decode_all(compressed.as_slice())?;
    let file: RecoveryFile = serde_json::from_slice(&json)?;
    if file.version != RECOVERY_FORMAT_VERSION {
        return Err(StatsError::Internal(format!(
            "unsupported recovery file version {} in {}",
            file.version,
            path.display()
        )));
    }

    let age = Duration::from_millis(unix_millis().saturating_sub(file.written_at_ms));
    if age > max_age {
        let discarded = file.updates.len();
        warn!(
            "Discarding stale recovery file {} ({} updates, {:?} old)",
            path.display(),
            discarded,
            age
        );
        remove_checkpoint(path)?;
        return Ok(RecoveryOutcome::Stale { age, discarded });
    }

    info!("Loaded {} updates from recovery file {}", file.updates.len(), path.display());
    Ok(RecoveryOutcome::Loaded(file.updates))
}
