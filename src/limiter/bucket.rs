//! Per-identity token bucket state and refill math.

use std::time::Instant;

/// Admission state for a single identity.
///
/// Tokens are accounted continuously as `f64` rather than in discrete
/// refill ticks, which gives exact sub-second fairness. All time math
/// uses the monotonic clock (`Instant`), so wall-clock adjustments
/// never distort refill.
///
/// A bucket is created under its shard's lock at the moment of the
/// identity's first admission check, so it starts full with both
/// timestamps set to that instant. The first check therefore never
/// observes a backdated refill window.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current quota. Invariant: `0 <= tokens <= max_tokens` after
    /// every operation.
    tokens: f64,
    /// When the refill math last ran.
    last_refill: Instant,
    /// When the identity was last seen (admitted or not). Read only
    /// by the janitor to decide eviction, never by the refill math.
    last_access: Instant,
}

impl TokenBucket {
    /// Create a full bucket for a never-seen identity.
    pub fn new(max_tokens: f64, now: Instant) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: now,
            last_access: now,
        }
    }

    /// Credit tokens for the time elapsed since the last refill and
    /// stamp the access time.
    ///
    /// The clamp runs unconditionally: if configuration was reloaded
    /// to a lower ceiling mid-run, any excess is dropped here.
    pub fn refill(&mut self, max_tokens: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens += elapsed * refill_rate;
            self.last_refill = now;
        }
        if self.tokens > max_tokens {
            self.tokens = max_tokens;
        }
        self.last_access = now;
    }

    /// Try to pay `cost` tokens. On failure the balance is unchanged.
    pub fn try_consume(&mut self, cost: f64) -> bool {
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Refill, then attempt to consume `cost`. The single-call
    /// admission check.
    pub fn allow(&mut self, max_tokens: f64, refill_rate: f64, cost: f64, now: Instant) -> bool {
        self.refill(max_tokens, refill_rate, now);
        self.try_consume(cost)
    }

    /// Whole tokens currently available, for display.
    pub fn remaining(&self) -> u64 {
        self.tokens.max(0.0).floor() as u64
    }

    /// Seconds until `cost` tokens are affordable. Zero when they
    /// already are.
    pub fn seconds_until_ready(&self, refill_rate: f64, cost: f64) -> f64 {
        if self.tokens >= cost {
            return 0.0;
        }
        (cost - self.tokens) / refill_rate
    }

    /// Seconds until the bucket is back at its ceiling.
    pub fn seconds_until_full(&self, max_tokens: f64, refill_rate: f64) -> f64 {
        let missing = (max_tokens - self.tokens).max(0.0);
        missing / refill_rate
    }

    /// When this identity last made an admission check.
    pub fn last_access(&self) -> Instant {
        self.last_access
    }
}
