// scrim_stats/server/src/server/instance.rs
use crate::concurrent::task_supervisor::TaskSupervisor;
use crate::core::config::ServerConfig;
use crate::core::constants::SUPERVISOR_SHUTDOWN_TIMEOUT;
use crate::core::error::StatsResult;
use crate::core::types::GameEvent;
use crate::entities::player::PlayerSessionStore;
use crate::persistence::{PersistencePipeline, PipelineHandle, ShutdownReport, StatsRepository};
use crate::systems::analytics::CombatAnalyticsEngine;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns every long-lived component: session store, analytics engine,
/// persistence pipeline and the background task supervisor.
pub struct StatsServer {
    pub config: Arc<ServerConfig>,
    pub sessions: Arc<PlayerSessionStore>,
    pub supervisor: Arc<TaskSupervisor>,
    pub(crate) engine: CombatAnalyticsEngine,
    pipeline: PersistencePipeline,
}

impl StatsServer {
    /// Validates the config, replays any recovery file into the pipeline and
    /// starts the pipeline's background tasks.
    pub async fn new(config: ServerConfig, repository: Arc<dyn StatsRepository>) -> StatsResult<Self> {
        config.validate()?;
        info!("Initializing StatsServer...");

        let mut pipeline = PersistencePipeline::open(config.pipeline.clone(), repository).await?;
        pipeline.start();
        info!(
            "Persistence pipeline started (queue capacity {}, flush concurrency {})",
            config.pipeline.queue_capacity, config.pipeline.flush_concurrency
        );

        let config = Arc::new(config);
        let sessions = Arc::new(PlayerSessionStore::default());
        let supervisor = Arc::new(TaskSupervisor::new());
        let engine = CombatAnalyticsEngine::new(
            Arc::new(config.analytics.clone()),
            sessions.clone(),
            pipeline.handle(),
            supervisor.clone(),
        );

        info!("StatsServer initialized successfully.");
        Ok(StatsServer { config, sessions, supervisor, engine, pipeline })
    }

    pub fn handle_event(&mut self, event: GameEvent) -> bool {
        self.engine.handle(event)
    }

    pub fn engine(&self) -> &CombatAnalyticsEngine {
        &self.engine
    }

    pub fn pipeline_handle(&self) -> PipelineHandle {
        self.pipeline.handle()
    }

    /// Awaits supervised side tasks first so their enqueues land before the
    /// pipeline closes, then drains the pipeline.
    pub async fn shutdown(self) -> ShutdownReport {
        info!("StatsServer shutting down ({} events handled)", self.engine.events_handled());
        let aborted = self.supervisor.shutdown(SUPERVISOR_SHUTDOWN_TIMEOUT).await;
        if aborted > 0 {
            warn!("{} background tasks aborted at shutdown", aborted);
        }
        self.pipeline.shutdown().await
    }
}
