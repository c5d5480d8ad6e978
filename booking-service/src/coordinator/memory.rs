use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::Coordinator;
use crate::error::CoordinatorError;

struct Entry {
    value: String,
    expires_at: Instant,
}

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Keyspace {
    entries: HashMap<String, Entry>,
    last_sweep: Instant,
}

/// Process-local keyspace. Expired keys are dropped when touched, and all of
/// them at most once per sweep interval on `set_if_absent`.
pub struct MemoryCoordinator {
    keyspace: Mutex<Keyspace>,
    sweep_interval: Duration,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            keyspace: Mutex::new(Keyspace {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            sweep_interval,
        }
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(key);
        }
    }

    fn sweep(&self, keyspace: &mut Keyspace) {
        let now = Instant::now();
        if now.duration_since(keyspace.last_sweep) < self.sweep_interval {
            return;
        }
        keyspace.entries.retain(|_, entry| entry.expires_at > now);
        keyspace.last_sweep = now;
    }

    #[cfg(test)]
    async fn key_count(&self) -> usize {
        self.keyspace.lock().await.entries.len()
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        let mut keyspace = self.keyspace.lock().await;
        self.sweep(&mut keyspace);
        let entries = &mut keyspace.entries;
        Self::purge_expired(entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordinatorError> {
        let mut keyspace = self.keyspace.lock().await;
        let entries = &mut keyspace.entries;
        Self::purge_expired(entries, key);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool, CoordinatorError> {
        let mut keyspace = self.keyspace.lock().await;
        let entries = &mut keyspace.entries;
        Self::purge_expired(entries, key);
        match entries.get(key) {
            Some(entry) if entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), CoordinatorError> {
        Ok(())
    }
}
