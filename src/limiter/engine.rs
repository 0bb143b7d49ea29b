//! Core admission engine: shard routing and the check API.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::janitor::Janitor;
use super::shard::Shard;
use crate::config::LimiterConfig;

/// Outcome of one admission check, including the metadata the HTTP
/// layer turns into rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Whole tokens left after this check; 0 on denial
    pub remaining: u64,
    /// Seconds until one more admission would succeed; 0 when allowed
    pub retry_after_secs: u64,
    /// Seconds until the bucket is full again; 0 when already full
    pub reset_after_secs: u64,
}

/// The rate limiter engine.
///
/// Owns a fixed array of shards and routes each identity to one of
/// them by hash, so a single identity's operations are serialized by
/// exactly one lock and never need cross-shard coordination. A
/// background [`Janitor`] evicts identities idle past the configured
/// timeout.
///
/// This struct is thread-safe and is meant to be shared behind an
/// `Arc` across request handlers.
pub struct RateLimiter {
    config: LimiterConfig,
    shards: Arc<Vec<Shard>>,
    /// Seeded per engine instance; stable for the engine's lifetime,
    /// intentionally not stable across restarts.
    hasher: RandomState,
    janitor: Janitor,
}

impl RateLimiter {
    /// Create the engine and start its janitor. Must be called from
    /// within a tokio runtime.
    pub fn new(config: LimiterConfig) -> Self {
        // Capacity hint only; shard maps grow past it freely.
        let per_shard = (config.max_ips / config.shards).max(1);

        let shards: Arc<Vec<Shard>> = Arc::new(
            (0..config.shards)
                .map(|_| Shard::with_capacity(per_shard))
                .collect(),
        );

        debug!(
            shards = config.shards,
            per_shard_capacity = per_shard,
            "Rate limiter engine created"
        );

        let janitor = Janitor::spawn(
            shards.clone(),
            config.janitor_interval,
            config.expiry_timeout,
        );

        Self {
            config,
            shards,
            hasher: RandomState::new(),
            janitor,
        }
    }

    /// Run one admission check for `identity`.
    ///
    /// Takes the identity's shard lock for the whole
    /// lookup-or-create, refill, consume sequence; never more than
    /// one lock. Cannot fail: a never-seen identity gets a fresh full
    /// bucket created on the spot.
    pub fn check(&self, identity: &str) -> Decision {
        let cfg = &self.config;
        let shard = &self.shards[self.shard_index(identity)];

        let mut buckets = shard.lock();
        let now = Instant::now();

        let bucket = buckets
            .entry(identity.to_string())
            .or_insert_with(|| {
                trace!(identity, "Creating bucket for new identity");
                TokenBucket::new(cfg.max_tokens, now)
            });

        // Elapsed time is zero for a bucket created just above, so a
        // brand-new identity starts full rather than accruing a
        // backdated refill.
        bucket.refill(cfg.max_tokens, cfg.refill_rate, now);

        // Time until full, measured after refill but before this
        // check's consumption.
        let reset_after_secs = bucket
            .seconds_until_full(cfg.max_tokens, cfg.refill_rate)
            .ceil() as u64;

        if bucket.try_consume(cfg.token_cost) {
            Decision {
                allowed: true,
                remaining: bucket.remaining(),
                retry_after_secs: 0,
                reset_after_secs,
            }
        } else {
            let retry_after_secs = bucket
                .seconds_until_ready(cfg.refill_rate, cfg.token_cost)
                .ceil() as u64;
            debug!(identity, retry_after_secs, "Rate limit exceeded");
            Decision {
                allowed: false,
                remaining: 0,
                retry_after_secs,
                reset_after_secs,
            }
        }
    }

    /// Number of live identities in one shard. Diagnostic accessor;
    /// returns 0 for an out-of-range index.
    pub fn shard_len(&self, index: usize) -> usize {
        self.shards.get(index).map_or(0, Shard::len)
    }

    /// The immutable configuration this engine was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Stop the janitor and wait for it to finish. Call after the
    /// owning service has stopped routing requests.
    pub async fn shutdown(&self) {
        self.janitor.shutdown().await;
    }

    fn shard_index(&self, identity: &str) -> usize {
        (self.hasher.hash_one(identity) % self.config.shards as u64) as usize
    }
}
