// scrim_stats/server/src/concurrent/task_supervisor.rs
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Keeps handles to side-effect tasks so none is orphaned at process exit.
#[derive(Default)]
pub struct TaskSupervisor {
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
    spawned: AtomicU64,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns on the current runtime. Returns `false` when called outside one.
    pub fn spawn<F>(&self, name: &str, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime available for background task '{}'", name);
            return false;
        };
        let handle = runtime.spawn(fut);
        let mut tasks = self.tasks.lock();
        tasks.retain(|(_, h)| !h.is_finished());
        tasks.push((name.to_string(), handle));
        self.spawned.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn active(&self) -> usize {
        self.tasks.lock().iter().filter(|(_, h)| !h.is_finished()).count()
    }

    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Awaits every tracked task until `timeout`; stragglers are aborted.
    /// Returns how many had to be aborted.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let deadline = Instant::now() + timeout;
        let mut aborted = 0;
        for (name, mut handle) in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => debug!("Background task '{}' finished", name),
                Ok(Err(e)) => error!("Background task '{}' failed: {}", name, e),
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                    warn!("Background task '{}' aborted at shutdown", name);
                }
            }
        }
        aborted
    }
}
