// scrim_stats/server/src/server/event_loop.rs
use super::instance::StatsServer;
use crate::core::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::error::{StatsError, StatsResult};
use crate::core::types::GameEvent;
use crate::persistence::ShutdownReport;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub fn event_channel() -> (mpsc::Sender<GameEvent>, mpsc::Receiver<GameEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Parses one JSON-lines record of an event capture.
pub fn parse_event_line(line: &str) -> StatsResult<GameEvent> {
    serde_json::from_str(line.trim()).map_err(|e| StatsError::MalformedEvent(e.to_string()))
}

impl StatsServer {
    /// Single consumer of the event stream. Events are handled strictly one
    /// at a time; between them the auto-flush tick emits mid-round snapshots.
    /// Returns once the source closes or `cancel` fires, after shutdown.
    pub async fn run_event_loop(
        mut self,
        mut events: mpsc::Receiver<GameEvent>,
        cancel: CancellationToken,
    ) -> ShutdownReport {
        let mut auto_flush = interval(self.config.auto_flush_interval());
        auto_flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        auto_flush.tick().await;

        info!("Event loop started. Auto-flush every {:?}", self.config.auto_flush_interval());
        let mut handled: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Event loop cancelled after {} events", handled);
                    break;
                }
                _ = auto_flush.tick() => {
                    let queued = self.engine.flush_all_snapshots();
                    debug!("Auto-flush queued {} player snapshots", queued);
                }
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => {
                        self.handle_event(event);
                        handled += 1;
                    }
                    None => {
                        info!("Event source closed after {} events", handled);
                        break;
                    }
                },
            }
        }

        self.shutdown().await
    }
}
