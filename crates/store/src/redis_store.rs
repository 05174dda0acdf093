use std::num::NonZeroUsize;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::debug;

use crate::{AtomicOp, BackendKind, Store, StoreResult};

/// Fixed window: increment, and start the window's TTL when the counter
/// was just created so the two steps cannot be split by a concurrent
/// admission.
static FIXED_WINDOW_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#,
    )
});

/// Sliding window log: prune, count, conditionally record. ARGV: cutoff,
/// limit, now, member, ttl.
static SLIDING_LOG_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
if count < tonumber(ARGV[2]) then
  redis.call('ZADD', KEYS[1], ARGV[3], ARGV[4])
  redis.call('EXPIRE', KEYS[1], ARGV[5])
  return 1
end
return 0
"#,
    )
});

/// Sliding window counter: weighted estimate over the current and previous
/// slice counters. KEYS: current, previous. ARGV: previous weight, limit,
/// ttl.
static SLIDING_COUNTER_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local previous = tonumber(redis.call('GET', KEYS[2]) or '0')
if previous * tonumber(ARGV[1]) + current < tonumber(ARGV[2]) then
  redis.call('INCR', KEYS[1])
  redis.call('EXPIRE', KEYS[1], ARGV[3])
  return 1
end
return 0
"#,
    )
});

/// Token bucket: refill by elapsed time, then take one token if available.
/// ARGV: now, capacity, refill rate, ttl. A clock that went backwards
/// refills nothing.
static TOKEN_BUCKET_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local data = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill')
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local rate = tonumber(ARGV[3])
local tokens = tonumber(data[1])
local last = tonumber(data[2])
if tokens == nil then tokens = capacity end
if last == nil then last = now end
local elapsed = now - last
if elapsed < 0 then elapsed = 0 end
tokens = math.min(capacity, tokens + elapsed * rate)
local allowed = 0
if tokens >= 1 then
  tokens = tokens - 1
  allowed = 1
end
redis.call('HSET', KEYS[1], 'tokens', tokens, 'last_refill', now)
redis.call('EXPIRE', KEYS[1], ARGV[4])
return allowed
"#,
    )
});

/// Redis-backed [`Store`].
///
/// Cloning is cheap; the underlying [`ConnectionManager`] multiplexes one
/// connection and reconnects transparently after transient failures.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// Fails if the initial connection cannot be established.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        debug!(url, "connecting to redis");
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let set: bool = conn.expire(key, seconds as i64).await?;
        Ok(set)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        match ttl_secs {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let set: bool = conn.set_nx(key, value).await?;
        Ok(set)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, max: f64) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.zrembyscore(key, "-inf", max).await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(key).await?;
        Ok(count)
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.rpush(key, value).await?;
        Ok(len)
    }

    async fn lpop(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
        let Some(count) = NonZeroUsize::new(count) else {
            return Ok(Vec::new());
        };
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lpop(key, Some(count)).await?;
        Ok(values)
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.rpop(key, None).await?;
        Ok(value)
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(key, start as isize, stop as isize).await?;
        Ok(values)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.scard(key).await?;
        Ok(count)
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn run_atomic(&self, op: AtomicOp<'_>) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let result: i64 = match op {
            AtomicOp::FixedWindowIncr { key, window_secs } => {
                FIXED_WINDOW_SCRIPT
                    .key(key)
                    .arg(window_secs)
                    .invoke_async(&mut conn)
                    .await?
            }
            AtomicOp::SlidingLogAdmit {
                key,
                now,
                window_secs,
                limit,
                member,
            } => {
                SLIDING_LOG_SCRIPT
                    .key(key)
                    .arg(now - window_secs as f64)
                    .arg(limit)
                    .arg(now)
                    .arg(member)
                    .arg(window_secs + 1)
                    .invoke_async(&mut conn)
                    .await?
            }
            AtomicOp::SlidingCounterAdmit {
                current_key,
                previous_key,
                previous_weight,
                limit,
                ttl_secs,
            } => {
                SLIDING_COUNTER_SCRIPT
                    .key(current_key)
                    .key(previous_key)
                    .arg(previous_weight)
                    .arg(limit)
                    .arg(ttl_secs)
                    .invoke_async(&mut conn)
                    .await?
            }
            AtomicOp::TokenBucketTake {
                key,
                now,
                capacity,
                refill_rate,
                ttl_secs,
            } => {
                TOKEN_BUCKET_SCRIPT
                    .key(key)
                    .arg(now)
                    .arg(capacity)
                    .arg(refill_rate)
                    .arg(ttl_secs)
                    .invoke_async(&mut conn)
                    .await?
            }
        };
        Ok(result)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Redis
    }
}
