use std::hash::Hash;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Owned, short-lived key/value table with a fixed TTL.
///
/// Entries are checked on access and evicted lazily; `purge_expired()`
/// sweeps the rest. Opening an existing key replaces it and restarts its
/// lifetime.
pub struct SessionTable<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
}

impl<K, V> SessionTable<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn open(&self, key: K, value: V) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if Instant::now() < entry.expires_at {
                return Some(entry.value.clone());
            }
            // expired: drop the ref before removing
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    /// Edit a live session in place. Returns `None` if it is absent or expired.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let now = Instant::now();
        let mut entry = self.entries.get_mut(key)?;
        if now >= entry.expires_at {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(f(&mut entry.value))
    }

    /// Remove and return a live session.
    pub fn take(&self, key: &K) -> Option<V> {
        let (_, entry) = self.entries.remove(key)?;
        (Instant::now() < entry.expires_at).then_some(entry.value)
    }

    pub fn discard(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let table: SessionTable<String, u32> = SessionTable::new(Duration::from_secs(60));
        table.open("a".into(), 1);
        table.open("b".into(), 2);
        assert_eq!(table.get(&"a".to_string()), Some(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(table.get(&"a".to_string()), None);
        assert!(table.update(&"b".to_string(), |v| *v += 1).is_none());
        table.open("c".into(), 3);
        assert_eq!(table.purge_expired(), 0);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_and_take() {
        let table: SessionTable<u8, Vec<u8>> = SessionTable::new(Duration::from_secs(10));
        table.open(1, vec![]);
        assert_eq!(table.update(&1, |v| {
            v.push(7);
            v.len()
        }), Some(1));
        assert_eq!(table.take(&1), Some(vec![7]));
        assert!(table.take(&1).is_none());
        assert!(!table.discard(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_counts_expired() {
        let table: SessionTable<u8, ()> = SessionTable::new(Duration::from_secs(5));
        table.open(1, ());
        table.open(2, ());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(table.purge_expired(), 2);
        assert!(table.is_empty());
    }
}
