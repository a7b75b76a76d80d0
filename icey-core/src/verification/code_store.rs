use crate::error::{IceyError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Key/counter store holding verification codes.
///
/// Every operation is atomic for a single key.
#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Current counter, `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Atomically increment and return the new counter.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Atomically increment a live key, `None` when it is absent or expired.
    ///
    /// Unlike [`CodeStore::incr`] this never recreates a key.
    async fn incr_existing(&self, key: &str) -> Result<Option<i64>>;

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;
}

struct MemoryEntry {
    value: i64,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// Process-local code store with per-key expiry.
#[derive(Default)]
pub struct MemoryCodeStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn bump(key: &str, entry: &mut MemoryEntry) -> Result<i64> {
    entry.value = entry
        .value
        .checked_add(1)
        .ok_or_else(|| IceyError::CodeStore(format!("counter overflow for {}", key)))?;
    Ok(entry.value)
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let entry = entries
            .entry(key.to_string())
            .or_insert(MemoryEntry {
                value: 0,
                expires_at: None,
            });

        if !entry.is_live(now) {
            entry.value = 0;
            entry.expires_at = None;
        }

        bump(key, entry)
    }

    async fn incr_existing(&self, key: &str) -> Result<Option<i64>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => bump(key, entry).map(Some),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
