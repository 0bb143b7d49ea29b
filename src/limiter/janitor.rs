//! Background reclamation of idle identity state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::shard::Shard;

/// Periodic sweeper that evicts buckets idle longer than the expiry
/// timeout, bounding the engine's memory.
///
/// Runs as a dedicated tokio task for the engine's whole lifetime.
/// Each sweep takes one shard lock at a time, so the longest pause an
/// admission check can see is one shard's retain pass, never a
/// whole-engine freeze.
pub(crate) struct Janitor {
    stop: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Janitor {
    /// Spawn the sweep task. Must be called from within a tokio
    /// runtime.
    pub(crate) fn spawn(
        shards: Arc<Vec<Shard>>,
        interval: Duration,
        expiry_timeout: Duration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                // The watch channel latches the stop value, so a
                // signal sent while a sweep is running is still seen
                // on the next iteration rather than lost.
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = tokio::time::sleep(interval) => {
                        sweep(&shards, expiry_timeout);
                    }
                }
            }
            trace!("Janitor stopped");
        });

        Self {
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal the task to stop, waking it mid-wait, and wait for it
    /// to finish. Idempotent.
    pub(crate) async fn shutdown(&self) {
        let _ = self.stop.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        // If the engine is dropped without an explicit shutdown, the
        // task still exits on its own; it just isn't joined here
        // because drop cannot block the runtime.
        let _ = self.stop.send(true);
    }
}

/// One pass over every shard, evicting idle buckets.
fn sweep(shards: &[Shard], expiry_timeout: Duration) {
    let now = Instant::now();
    let mut evicted = 0;
    for shard in shards {
        evicted += shard.evict_idle(now, expiry_timeout);
    }
    if evicted > 0 {
        debug!(evicted, "Janitor evicted idle identities");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::bucket::TokenBucket;

    #[tokio::test]
    async fn shutdown_interrupts_a_long_wait() {
        let shards = Arc::new(vec![Shard::with_capacity(4)]);
        let janitor = Janitor::spawn(shards, Duration::from_secs(3600), Duration::from_secs(1));

        // Completes immediately despite the hour-long interval.
        tokio::time::timeout(Duration::from_secs(1), janitor.shutdown())
            .await
            .expect("shutdown should not wait out the interval");
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let shards = Arc::new(vec![Shard::with_capacity(4)]);
        let janitor = Janitor::spawn(shards, Duration::from_secs(3600), Duration::from_secs(1));

        janitor.shutdown().await;
        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn sweeps_remove_idle_buckets() {
        let shards = Arc::new(vec![Shard::with_capacity(4), Shard::with_capacity(4)]);
        let now = Instant::now();
        shards[0]
            .lock()
            .insert("10.0.0.1".to_string(), TokenBucket::new(10.0, now));
        shards[1]
            .lock()
            .insert("10.0.0.2".to_string(), TokenBucket::new(10.0, now));

        let janitor = Janitor::spawn(
            shards.clone(),
            Duration::from_millis(5),
            Duration::from_millis(1),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(shards[0].len(), 0);
        assert_eq!(shards[1].len(), 0);
        janitor.shutdown().await;
    }
}
