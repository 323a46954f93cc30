// scrim_stats/server/src/concurrent/update_queue.rs
use crate::persistence::PersistenceUpdate;
use crossbeam_queue::ArrayQueue;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

// Upper bound on a single wait for space; a missed wake-up costs at most this.
const SPACE_POLL: Duration = Duration::from_millis(5);

/// Bounded lock-free queue between producers and the batching task.
/// `push` never blocks; `push_timeout` waits for space at most `wait`.
pub struct UpdateQueue {
    queue: ArrayQueue<PersistenceUpdate>,
    items: Notify,
    space: Notify,
}

impl UpdateQueue {
    pub fn new(capacity: usize) -> Self {
        UpdateQueue {
            queue: ArrayQueue::new(capacity.max(1)),
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Hands the update back when the queue is full.
    pub fn push(&self, update: PersistenceUpdate) -> Result<(), PersistenceUpdate> {
        self.queue.push(update)?;
        self.items.notify_one();
        Ok(())
    }

    pub async fn push_timeout(&self, update: PersistenceUpdate, wait: Duration) -> Result<(), PersistenceUpdate> {
        let deadline = Instant::now() + wait;
        let mut pending = update;
        loop {
            match self.push(pending) {
                Ok(()) => return Ok(()),
                Err(back) => pending = back,
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(pending);
            }
            let slice = (deadline - now).min(SPACE_POLL);
            let _ = tokio::time::timeout(slice, self.space.notified()).await;
        }
    }

    pub fn pop(&self) -> Option<PersistenceUpdate> {
        let update = self.queue.pop();
        if update.is_some() {
            self.space.notify_waiters();
        }
        update
    }

    pub fn pop_batch(&self, max_count: usize) -> Vec<PersistenceUpdate> {
        let mut batch = Vec::with_capacity(max_count.min(self.queue.len()));
        while batch.len() < max_count {
            match self.queue.pop() {
                Some(update) => batch.push(update),
                None => break,
            }
        }
        if !batch.is_empty() {
            self.space.notify_waiters();
        }
        batch
    }

    /// Resolves once something has been pushed since the last wake-up.
    pub async fn items_available(&self) {
        self.items.notified().await
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
