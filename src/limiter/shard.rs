//! Lock-partitioned storage for token buckets.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use super::bucket::TokenBucket;

/// One partition of the identity space: a map of identity to bucket
/// behind a single mutex.
///
/// An identity maps to exactly one shard for the engine's lifetime,
/// so no operation ever needs more than one shard lock. Aligned to a
/// cache line so neighboring shards in the engine's array do not
/// false-share.
#[repr(align(64))]
pub(crate) struct Shard {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl Shard {
    /// Create an empty shard. `capacity` is a soft sizing hint
    /// (expected identities per shard); the map may grow past it.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Take the shard lock for a read-modify-write sequence.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock()
    }

    /// Number of live identities in this shard.
    pub(crate) fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Drop every bucket idle longer than `timeout`. Returns how many
    /// were evicted. Holds this shard's lock only for the duration of
    /// the retain pass.
    pub(crate) fn evict_idle(&self, now: Instant, timeout: Duration) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_access()) <= timeout);
        before - buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_only_idle_buckets() {
        let shard = Shard::with_capacity(8);
        let now = Instant::now();

        shard
            .lock()
            .insert("stale".to_string(), TokenBucket::new(10.0, now));
        let later = now + Duration::from_millis(100);
        shard
            .lock()
            .insert("fresh".to_string(), TokenBucket::new(10.0, later));

        let evicted = shard.evict_idle(later + Duration::from_millis(50), Duration::from_millis(100));

        assert_eq!(evicted, 1);
        assert_eq!(shard.len(), 1);
        assert!(shard.lock().contains_key("fresh"));
    }

    #[test]
    fn eviction_on_empty_shard_is_a_noop() {
        let shard = Shard::with_capacity(8);
        assert_eq!(shard.evict_idle(Instant::now(), Duration::from_secs(1)), 0);
    }
}
