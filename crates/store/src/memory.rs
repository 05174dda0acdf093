use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::{AtomicOp, BackendKind, Store, StoreError, StoreResult};

/// In-process [`Store`] with Redis-equivalent semantics.
///
/// A single mutex guards the whole keyspace, which also gives the scripted
/// [`AtomicOp`] sequences their atomicity: while the lock is held, no other
/// task can observe a partially-applied sequence. Expiry is lazy, like
/// Redis with passive eviction: a key past its deadline is dropped the next
/// time anything touches it.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    SortedSet(BTreeMap<String, f64>),
    List(VecDeque<String>),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Unix-seconds deadline; `None` means the key never expires.
    expires_at: Option<f64>,
}

impl Entry {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Redis-style glob: `*` matches any run, `?` matches one character.
fn glob_match(pattern: &str, value: &str) -> bool {
    fn inner(pattern: &[u8], value: &[u8]) -> bool {
        match (pattern.first(), value.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], value) || (!value.is_empty() && inner(pattern, &value[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&pattern[1..], &value[1..]),
            (Some(p), Some(v)) if p == v => inner(&pattern[1..], &value[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), value.as_bytes())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().expect("memory store lock poisoned")
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop the entry when its deadline has passed, then hand back whatever is
/// live under `key`.
fn live<'m>(
    entries: &'m mut HashMap<String, Entry>,
    key: &str,
    now: f64,
) -> Option<&'m mut Entry> {
    if let Some(entry) = entries.get(key) {
        if matches!(entry.expires_at, Some(deadline) if deadline <= now) {
            entries.remove(key);
            return None;
        }
    }
    entries.get_mut(key)
}

fn incr_in(entries: &mut HashMap<String, Entry>, key: &str, now: f64) -> StoreResult<i64> {
    match live(entries, key, now) {
        None => {
            entries.insert(key.to_string(), Entry::persistent(Value::Str("1".into())));
            Ok(1)
        }
        Some(entry) => match &mut entry.value {
            Value::Str(raw) => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| StoreError::WrongType(key.to_string()))?;
                let value = value + 1;
                *raw = value.to_string();
                Ok(value)
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        },
    }
}

fn read_counter(entries: &mut HashMap<String, Entry>, key: &str, now: f64) -> StoreResult<i64> {
    match live(entries, key, now) {
        None => Ok(0),
        Some(entry) => match &entry.value {
            Value::Str(raw) => raw
                .parse()
                .map_err(|_| StoreError::WrongType(key.to_string())),
            _ => Err(StoreError::WrongType(key.to_string())),
        },
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn incr(&self, key: &str) -> StoreResult<i64> {
        incr_in(&mut self.lock(), key, unix_now())
    }

    async fn expire(&self, key: &str, seconds: u64) -> StoreResult<bool> {
        let now = unix_now();
        let mut entries = self.lock();
        match live(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + seconds as f64);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.lock();
        match live(&mut entries, key, unix_now()) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Str(raw) => Ok(Some(raw.clone())),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        let now = unix_now();
        self.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl_secs.map(|ttl| now + ttl as f64),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool> {
        let now = unix_now();
        let mut entries = self.lock();
        if live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry::persistent(Value::Str(value.to_string())),
        );
        Ok(true)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        let now = unix_now();
        let mut entries = self.lock();
        match live(&mut entries, key, now) {
            None => {
                let mut set = BTreeMap::new();
                set.insert(member.to_string(), score);
                entries.insert(key.to_string(), Entry::persistent(Value::SortedSet(set)));
                Ok(())
            }
            Some(entry) => match &mut entry.value {
                Value::SortedSet(set) => {
                    set.insert(member.to_string(), score);
                    Ok(())
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn zremrangebyscore(&self, key: &str, max: f64) -> StoreResult<u64> {
        let now = unix_now();
        let mut entries = self.lock();
        match live(&mut entries, key, now) {
            None => Ok(0),
            Some(entry) => match &mut entry.value {
                Value::SortedSet(set) => {
                    let before = set.len();
                    set.retain(|_, score| *score > max);
                    let removed = (before - set.len()) as u64;
                    if set.is_empty() {
                        entries.remove(key);
                    }
                    Ok(removed)
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut entries = self.lock();
        match live(&mut entries, key, unix_now()) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::SortedSet(set) => Ok(set.len() as u64),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let now = unix_now();
        let mut entries = self.lock();
        match live(&mut entries, key, now) {
            None => {
                let mut list = VecDeque::new();
                list.push_back(value.to_string());
                entries.insert(key.to_string(), Entry::persistent(Value::List(list)));
                Ok(1)
            }
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    list.push_back(value.to_string());
                    Ok(list.len() as u64)
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn lpop(&self, key: &str, count: usize) -> StoreResult<Vec<String>> {
        let now = unix_now();
        let mut entries = self.lock();
        match live(&mut entries, key, now) {
            None => Ok(Vec::new()),
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    let take = count.min(list.len());
                    let popped = list.drain(..take).collect();
                    if list.is_empty() {
                        entries.remove(key);
                    }
                    Ok(popped)
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<String>> {
        let now = unix_now();
        let mut entries = self.lock();
        match live(&mut entries, key, now) {
            None => Ok(None),
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    let popped = list.pop_back();
                    if list.is_empty() {
                        entries.remove(key);
                    }
                    Ok(popped)
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut entries = self.lock();
        match live(&mut entries, key, unix_now()) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::List(list) => Ok(list.len() as u64),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let mut entries = self.lock();
        match live(&mut entries, key, unix_now()) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::List(list) => {
                    let len = list.len() as i64;
                    let start = if start < 0 { len + start } else { start }.max(0);
                    let stop = if stop < 0 { len + stop } else { stop }.min(len - 1);
                    if start > stop || start >= len {
                        return Ok(Vec::new());
                    }
                    Ok(list
                        .iter()
                        .skip(start as usize)
                        .take((stop - start + 1) as usize)
                        .cloned()
                        .collect())
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let now = unix_now();
        let mut entries = self.lock();
        match live(&mut entries, key, now) {
            None => {
                let mut set = HashSet::new();
                set.insert(member.to_string());
                entries.insert(key.to_string(), Entry::persistent(Value::Set(set)));
                Ok(true)
            }
            Some(entry) => match &mut entry.value {
                Value::Set(set) => Ok(set.insert(member.to_string())),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let now = unix_now();
        let mut entries = self.lock();
        match live(&mut entries, key, now) {
            None => Ok(false),
            Some(entry) => match &mut entry.value {
                Value::Set(set) => {
                    let removed = set.remove(member);
                    if set.is_empty() {
                        entries.remove(key);
                    }
                    Ok(removed)
                }
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.lock();
        match live(&mut entries, key, unix_now()) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let mut entries = self.lock();
        match live(&mut entries, key, unix_now()) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.len() as u64),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
        }
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let now = unix_now();
        let mut entries = self.lock();
        entries.retain(|_, entry| !matches!(entry.expires_at, Some(deadline) if deadline <= now));
        Ok(entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn run_atomic(&self, op: AtomicOp<'_>) -> StoreResult<i64> {
        let wall = unix_now();
        let mut entries = self.lock();
        match op {
            AtomicOp::FixedWindowIncr { key, window_secs } => {
                let count = incr_in(&mut entries, key, wall)?;
                if count == 1 {
                    if let Some(entry) = entries.get_mut(key) {
                        entry.expires_at = Some(wall + window_secs as f64);
                    }
                }
                Ok(count)
            }
            AtomicOp::SlidingLogAdmit {
                key,
                now,
                window_secs,
                limit,
                member,
            } => {
                let cutoff = now - window_secs as f64;
                // Evict an expired log before touching it.
                live(&mut entries, key, wall);
                let entry = entries
                    .entry(key.to_string())
                    .or_insert_with(|| Entry::persistent(Value::SortedSet(BTreeMap::new())));
                let set = match &mut entry.value {
                    Value::SortedSet(set) => set,
                    _ => return Err(StoreError::WrongType(key.to_string())),
                };
                set.retain(|_, score| *score > cutoff);
                let admitted = (set.len() as u64) < limit;
                if admitted {
                    set.insert(member.to_string(), now);
                }
                if set.is_empty() {
                    entries.remove(key);
                } else if admitted {
                    // TTL refreshes on admission only, matching the script.
                    entry.expires_at = Some(wall + (window_secs + 1) as f64);
                }
                Ok(admitted as i64)
            }
            AtomicOp::SlidingCounterAdmit {
                current_key,
                previous_key,
                previous_weight,
                limit,
                ttl_secs,
            } => {
                let current = read_counter(&mut entries, current_key, wall)? as f64;
                let previous = read_counter(&mut entries, previous_key, wall)? as f64;
                if previous * previous_weight + current < limit as f64 {
                    incr_in(&mut entries, current_key, wall)?;
                    if let Some(entry) = entries.get_mut(current_key) {
                        entry.expires_at = Some(wall + ttl_secs as f64);
                    }
                    Ok(1)
                } else {
                    Ok(0)
                }
            }
            AtomicOp::TokenBucketTake {
                key,
                now,
                capacity,
                refill_rate,
                ttl_secs,
            } => {
                let (mut tokens, last_refill) = match live(&mut entries, key, wall) {
                    None => (capacity, now),
                    Some(entry) => match &entry.value {
                        Value::Hash(fields) => {
                            let tokens = fields
                                .get("tokens")
                                .and_then(|raw| raw.parse().ok())
                                .unwrap_or(capacity);
                            let last = fields
                                .get("last_refill")
                                .and_then(|raw| raw.parse().ok())
                                .unwrap_or(now);
                            (tokens, last)
                        }
                        _ => return Err(StoreError::WrongType(key.to_string())),
                    },
                };
                let elapsed = (now - last_refill).max(0.0);
                tokens = capacity.min(tokens + elapsed * refill_rate);
                let allowed = tokens >= 1.0;
                if allowed {
                    tokens -= 1.0;
                }
                let mut fields = HashMap::new();
                fields.insert("tokens".to_string(), tokens.to_string());
                fields.insert("last_refill".to_string(), now.to_string());
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Hash(fields),
                        expires_at: Some(wall + ttl_secs as f64),
                    },
                );
                Ok(allowed as i64)
            }
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Memory
    }
}
