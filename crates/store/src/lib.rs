//! Key–value store abstraction for the rate limiter.
//!
//! Every piece of shared limiter state lives behind the [`Store`] trait:
//! atomic counters, sorted sets, lists, plain sets, TTLs, and the scripted
//! multi-step admission sequences ([`AtomicOp`]). Two implementations are
//! provided:
//!
//! - [`RedisStore`] -- a networked Redis backend. Multi-step sequences run
//!   as server-side Lua scripts, so concurrent clients (including other
//!   service processes) observe each sequence as a single step.
//!
//! - [`MemoryStore`] -- an in-process fake with the same observable
//!   semantics, used when Redis is unavailable or explicitly disabled, and
//!   throughout the test suites.
//!
//! Correctness under horizontal scale-out rests entirely on the per-key
//! atomicity guaranteed here; callers never need locks of their own.

mod error;
mod memory;
mod redis_store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;

/// Which backend a [`Store`] implementation talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Redis,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Redis => "redis",
            BackendKind::Memory => "memory",
        }
    }
}

/// A multi-step admission sequence executed atomically by the store.
///
/// Redis runs each variant as one server-side Lua script; the in-process
/// store runs the identical steps under its store-wide lock. Either way no
/// other client can interleave between the sub-steps. The current time is
/// always passed in as an argument, never read inside the store, so both
/// backends are deterministic for a given input.
#[derive(Debug, Clone)]
pub enum AtomicOp<'a> {
    /// `INCR key`; set the TTL to `window_secs` when the counter was just
    /// created. Evaluates to the post-increment count.
    FixedWindowIncr { key: &'a str, window_secs: u64 },

    /// Prune members scored at or below `now - window_secs`, then, if the
    /// remaining cardinality is under `limit`, record `member` at score
    /// `now` and refresh the TTL to `window_secs + 1`. Evaluates to 1 on
    /// admit, 0 on reject.
    SlidingLogAdmit {
        key: &'a str,
        now: f64,
        window_secs: u64,
        limit: u64,
        member: &'a str,
    },

    /// Weighted two-slice estimate: admit and increment `current_key` when
    /// `previous_weight * count(previous) + count(current) < limit`, with
    /// missing counters reading as zero. The incremented counter gets
    /// `ttl_secs`. Evaluates to 1 on admit, 0 on reject.
    SlidingCounterAdmit {
        current_key: &'a str,
        previous_key: &'a str,
        previous_weight: f64,
        limit: u64,
        ttl_secs: u64,
    },

    /// Refill-then-take on a `{tokens, last_refill}` hash: refill by
    /// `elapsed * refill_rate` capped at `capacity` (negative elapsed
    /// refills nothing), consume one token when at least one is available,
    /// write the record back with `ttl_secs`. Evaluates to 1 when a token
    /// was consumed.
    TokenBucketTake {
        key: &'a str,
        now: f64,
        capacity: f64,
        refill_rate: f64,
        ttl_secs: u64,
    },
}

/// Async operations the rate-limiting core needs from the store.
///
/// Implementations must be safe to share across tasks; every method may
/// suspend at the network boundary.
#[async_trait]
pub trait Store: Send + Sync {
    /// Increment an integer counter, creating it at 0 first if absent.
    /// Returns the post-increment value.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Set a key's TTL. Returns false when the key does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()>;

    /// Set only when the key is absent. Returns whether the value was set.
    async fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool>;

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()>;

    /// Remove members with scores in `(-inf, max]`. Returns how many were
    /// removed.
    async fn zremrangebyscore(&self, key: &str, max: f64) -> StoreResult<u64>;

    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Append to a list, creating it if absent. Returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Pop up to `count` elements from the head of a list.
    async fn lpop(&self, key: &str, count: usize) -> StoreResult<Vec<String>>;

    /// Pop the tail element of a list.
    async fn rpop(&self, key: &str) -> StoreResult<Option<String>>;

    async fn llen(&self, key: &str) -> StoreResult<u64>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    /// Add a member to a set. Returns whether it was newly added.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove a member from a set. Returns whether it was present.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;
    async fn scard(&self, key: &str) -> StoreResult<u64>;

    async fn del(&self, key: &str) -> StoreResult<()>;

    /// Glob-match live keys. Used only by reset and monitor introspection,
    /// never on the admission path.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Execute a scripted admission sequence as a single atomic unit.
    async fn run_atomic(&self, op: AtomicOp<'_>) -> StoreResult<i64>;

    /// Cheap reachability probe for the health endpoint.
    async fn ping(&self) -> StoreResult<()>;

    fn backend(&self) -> BackendKind;
}
