//! Background flush worker.
//!
//! Drains the dirty queue in FIFO batches and runs each entity's save
//! protocol against the persistence driver. A failed save leaves the
//! entity's flags untouched and re-enqueues it, so nothing is lost and
//! the retry is a plain re-run.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep};
use tracing::{debug, error, info};

use crate::application::driver::PersistenceDriver;
use crate::cache::gate::AdmissionGate;
use crate::cache::queue::DirtyQueue;
use crate::infra::telemetry::RuntimeStats;

pub struct FlushScheduler {
    queue: Arc<DirtyQueue>,
    driver: Arc<dyn PersistenceDriver>,
    gate: Arc<AdmissionGate>,
    stats: Arc<RuntimeStats>,
    batch_size: usize,
    tick: Duration,
}

impl FlushScheduler {
    pub fn new(
        queue: Arc<DirtyQueue>,
        driver: Arc<dyn PersistenceDriver>,
        gate: Arc<AdmissionGate>,
        stats: Arc<RuntimeStats>,
        batch_size: usize,
        tick: Duration,
    ) -> Self {
        Self {
            queue,
            driver,
            gate,
            stats,
            batch_size,
            tick,
        }
    }

    /// Run until the stop latch is raised, then drain whatever is left.
    /// Intended to be spawned once at startup and awaited at shutdown.
    pub async fn run(self) {
        let mut ticker = interval(self.tick);
        // The first tick fires immediately; skip it so startup does not
        // race the snapshot load.
        ticker.tick().await;

        while !self.gate.is_stopping() {
            tokio::select! {
                _ = self.queue.wait_for_work() => {}
                _ = ticker.tick() => {}
            }
            self.flush_batch().await;
        }

        info!(
            target = "vetrina::flusher",
            remaining = self.queue.depth(),
            "Stop requested, draining dirty queue"
        );
        self.drain_to_empty().await;
        info!(target = "vetrina::flusher", "Dirty queue drained, flusher exiting");
    }

    async fn flush_batch(&self) -> usize {
        let batch = self.queue.drain(self.batch_size);
        let mut flushed = 0usize;
        for entity in batch {
            match entity.save(self.driver.as_ref()).await {
                Ok(()) => {
                    flushed += 1;
                    metrics::counter!("vetrina_flush_total").increment(1);
                }
                Err(err) => {
                    self.stats.record_db_error();
                    metrics::counter!("vetrina_flush_errors_total").increment(1);
                    error!(
                        target = "vetrina::flusher",
                        kind = entity.kind().as_str(),
                        id = entity.id(),
                        error = %err,
                        "Flush failed, re-enqueueing entity"
                    );
                    self.queue.push(entity);
                }
            }
        }
        if flushed > 0 {
            debug!(target = "vetrina::flusher", flushed, "Flushed batch");
        }
        flushed
    }

    /// Final drain: keep retrying until the queue is empty, backing off
    /// briefly when a whole batch fails so a dead driver does not spin
    /// the CPU.
    async fn drain_to_empty(&self) {
        while !self.queue.is_empty() {
            let flushed = self.flush_batch().await;
            if flushed == 0 {
                sleep(Duration::from_millis(200)).await;
            }
        }
    }
}
