//! The dirty queue: entities awaiting flush.
//!
//! Push is O(1); draining is FIFO. Duplicate enqueues are harmless
//! because the save protocol re-reads the flags under the entity lock,
//! but callers only enqueue on a clean-to-dirty transition so the
//! queue depth tracks distinct pending entities.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::gauge;
use tokio::sync::Notify;

use crate::cache::entries::Flushable;
use crate::cache::lock::mutex_lock;

const SOURCE: &str = "cache::queue";

pub struct DirtyQueue {
    queue: Mutex<VecDeque<Arc<dyn Flushable>>>,
    high_water: AtomicU64,
    notify: Notify,
}

impl DirtyQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            high_water: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue an entity for flushing and wake the flush worker.
    pub fn push(&self, entity: Arc<dyn Flushable>) {
        let depth = {
            let mut queue = mutex_lock(&self.queue, SOURCE, "push");
            queue.push_back(entity);
            queue.len() as u64
        };
        self.high_water.fetch_max(depth, Ordering::AcqRel);
        gauge!("vetrina_dirty_queue_depth").set(depth as f64);
        gauge!("vetrina_dirty_queue_high_water")
            .set(self.high_water.load(Ordering::Acquire) as f64);
        self.notify.notify_one();
    }

    /// Drain up to `limit` entities in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<Arc<dyn Flushable>> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained: Vec<_> = queue.drain(..count).collect();
        gauge!("vetrina_dirty_queue_depth").set(queue.len() as f64);
        drained
    }

    pub fn depth(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "depth").len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Maximum depth observed since process start, updated on every
    /// enqueue.
    pub fn high_water(&self) -> u64 {
        self.high_water.load(Ordering::Acquire)
    }

    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }
}

impl Default for DirtyQueue {
    fn default() -> Self {
        Self::new()
    }
}
