use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Low-latency shared store for token records, session project sets and
/// rate counters.
///
/// All session/token/rate state lives behind this trait so that any number
/// of stateless server processes can share one backing store without sticky
/// routing. Every operation is an independent idempotent read or atomic
/// increment; there is no cross-key transaction surface.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Refresh the TTL of an existing key. No-op if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Atomically increment a counter. The first increment in a window
    /// creates the counter with `window` as its TTL. Returns the new count
    /// and the time remaining in the current window.
    async fn incr_with_window(&self, key: &str, window: Duration) -> Result<(u64, Duration)>;

    /// Add a member to a set and refresh the set's TTL.
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<()>;

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_len(&self, key: &str) -> Result<u64>;
}

enum Slot {
    Text(String),
    Counter(u64),
    Set(HashSet<String>),
}

struct Entry {
    slot: Slot,
    expires_at: Instant,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local `KeyValueStore`. Stands in for the external store in
/// single-node deployments and in tests; TTL semantics match what the
/// handlers rely on (lazy expiry on access).
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.live(now) => match &entry.slot {
                Slot::Text(value) => Ok(Some(value.clone())),
                Slot::Counter(count) => Ok(Some(count.to_string())),
                Slot::Set(_) => Ok(None),
            },
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                slot: Slot::Text(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key)
            && entry.live(now)
        {
            entry.expires_at = now + ttl;
        }
        Ok(())
    }

    async fn incr_with_window(&self, key: &str, window: Duration) -> Result<(u64, Duration)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key)
            && entry.live(now)
            && let Slot::Counter(count) = &mut entry.slot
        {
            *count += 1;
            return Ok((*count, entry.expires_at - now));
        }

        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Counter(1),
                expires_at: now + window,
            },
        );
        Ok((1, window))
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key)
            && entry.live(now)
            && let Slot::Set(members) = &mut entry.slot
        {
            members.insert(member.to_string());
            entry.expires_at = now + ttl;
            return Ok(());
        }

        let mut members = HashSet::new();
        members.insert(member.to_string());
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Set(members),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let now = Instant::now();
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.live(now) => match &entry.slot {
                Slot::Set(members) => Ok(members.contains(member)),
                _ => Ok(false),
            },
            _ => Ok(false),
        }
    }

    async fn set_len(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.live(now) => match &entry.slot {
                Slot::Set(members) => Ok(members.len() as u64),
                _ => Ok(0),
            },
            _ => Ok(0),
        }
    }
}
