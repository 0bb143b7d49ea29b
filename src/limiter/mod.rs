//! Rate limiting engine and state management.

mod bucket;
mod engine;
mod janitor;
mod shard;

pub use bucket::TokenBucket;
pub use engine::{Decision, RateLimiter};
