// scrim_stats/server/src/persistence/failed_buffer.rs
use super::PersistenceUpdate;
use std::collections::VecDeque;

#[derive(Debug)]
struct BufferedBatch {
    updates: Vec<PersistenceUpdate>,
    bytes: usize,
}

/// Batches that exhausted their retries, kept for a later replay. Bounded by
/// serialized size; the oldest batches are evicted first.
#[derive(Debug)]
pub struct FailedBatchBuffer {
    batches: VecDeque<BufferedBatch>,
    total_bytes: usize,
    max_bytes: usize,
}

impl FailedBatchBuffer {
    pub fn new(max_bytes: usize) -> Self {
        FailedBatchBuffer { batches: VecDeque::new(), total_bytes: 0, max_bytes }
    }

    /// Buffers a batch and returns how many updates were evicted to make room.
    /// A batch larger than the whole budget is itself evicted.
    pub fn push(&mut self, updates: Vec<PersistenceUpdate>) -> usize {
        if updates.is_empty() {
            return 0;
        }
        let bytes: usize = updates.iter().map(PersistenceUpdate::estimated_bytes).sum();
        self.total_bytes += bytes;
        self.batches.push_back(BufferedBatch { updates, bytes });

        let mut evicted = 0;
        while self.total_bytes > self.max_bytes {
            match self.batches.pop_front() {
                Some(oldest) => {
                    self.total_bytes -= oldest.bytes;
                    evicted += oldest.updates.len();
                }
                None => break,
            }
        }
        evicted
    }

    pub fn drain_all(&mut self) -> Vec<PersistenceUpdate> {
        self.total_bytes = 0;
        self.batches.drain(..).flat_map(|batch| batch.updates).collect()
    }

    pub fn cloned_updates(&self) -> Vec<PersistenceUpdate> {
        self.batches.iter().flat_map(|batch| batch.updates.iter().cloned()).collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn update_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.updates.len()).sum()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
