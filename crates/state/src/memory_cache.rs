//! In-process reference cache with TTL expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use pi_domain::Result;

use crate::tiers::{CacheEntry, FastCache};

#[derive(Debug, Clone)]
enum Slot {
    Value(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// TTL map cache.  Expiry is lazy: entries are dropped when touched after
/// their deadline.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a mut Entry> {
        if map.get(key).is_some_and(|e| e.expired()) {
            map.remove(key);
            return None;
        }
        map.get_mut(key)
    }

    /// Number of live entries (test support).
    pub fn len(&self) -> usize {
        let mut map = self.entries.lock();
        map.retain(|_, e| !e.expired());
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl FastCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self.entries.lock();
        Ok(Self::live_entry(&mut map, key).and_then(|e| match &e.slot {
            Slot::Value(v) => Some(v.clone()),
            Slot::List(_) => None,
        }))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.entries.lock().insert(
            key.to_owned(),
            Entry {
                slot: Slot::Value(value),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn set_many(&self, entries: Vec<CacheEntry>) -> Result<()> {
        let mut map = self.entries.lock();
        for entry in entries {
            map.insert(
                entry.key,
                Entry {
                    slot: Slot::Value(entry.value),
                    expires_at: entry.ttl.map(|d| Instant::now() + d),
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn list_push_head(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut map = self.entries.lock();
        let expires_at = ttl.map(|d| Instant::now() + d);
        match Self::live_entry(&mut map, key) {
            Some(entry) => {
                if let Slot::List(items) = &mut entry.slot {
                    items.insert(0, value);
                } else {
                    entry.slot = Slot::List(vec![value]);
                }
                entry.expires_at = expires_at;
            }
            None => {
                map.insert(
                    key.to_owned(),
                    Entry {
                        slot: Slot::List(vec![value]),
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>> {
        let mut map = self.entries.lock();
        Ok(Self::live_entry(&mut map, key)
            .map(|e| match &e.slot {
                Slot::List(items) => items.clone(),
                Slot::Value(_) => Vec::new(),
            })
            .unwrap_or_default())
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.entries.lock();
        if let Some(entry) = Self::live_entry(&mut map, key) {
            if let Slot::List(items) = &mut entry.slot {
                items.retain(|v| v != value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_round_trip() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".into(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_push_head_newest_first() {
        let cache = MemoryCache::new();
        cache.list_push_head("l", "a".into(), None).await.unwrap();
        cache.list_push_head("l", "b".into(), None).await.unwrap();
        assert_eq!(cache.list_all("l").await.unwrap(), vec!["b", "a"]);
        cache.list_remove("l", "a").await.unwrap();
        assert_eq!(cache.list_all("l").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn set_many_writes_all() {
        let cache = MemoryCache::new();
        cache
            .set_many(vec![
                CacheEntry {
                    key: "a".into(),
                    value: "1".into(),
                    ttl: None,
                },
                CacheEntry {
                    key: "b".into(),
                    value: "2".into(),
                    ttl: None,
                },
            ])
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
    }
}
