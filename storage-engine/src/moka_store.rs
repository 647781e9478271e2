use async_trait::async_trait;
use bytes::Bytes;
use carbon::ports::{CacheStore, EnumerableStore};
use moka::Expiry;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::ops::compute::Op;
use shared::Result;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct Stored {
    raw: Bytes,
    ttl: Option<Duration>,
}

/// Expires each entry after the TTL it was stored with, reset on overwrite
struct PerEntryTtl;

impl Expiry<String, Stored> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Stored, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Stored,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Moka-based bounded store
/// Evicts by TinyLFU (frequency + recency) once `max_entries` is reached and
/// expires entries natively from the TTL hint passed to `store`
pub struct MokaStore {
    cache: Cache<String, Stored>,
}

impl MokaStore {
    /// Create a Moka store from name and optional capacity
    /// `None` leaves the store unbounded
    pub fn new(name: &str, max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder()
            .name(name)
            .expire_after(PerEntryTtl)
            .eviction_listener(|key: Arc<String>, _value: Stored, cause: RemovalCause| {
                if cause == RemovalCause::Size {
                    tracing::debug!(key = %key, "evicted to stay within capacity");
                }
            });

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    /// Create a bounded Moka store holding at most `max_entries` entries
    pub fn new_bounded(max_entries: u64) -> Self {
        Self::new("bounded", Some(max_entries))
    }
}

#[async_trait]
impl CacheStore for MokaStore {
    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        // Either doesn't exist, evicted or natively expired
        Ok(self.cache.get(key).await.map(|stored| stored.raw))
    }

    async fn store(&self, key: &str, raw: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.cache.insert(key.to_owned(), Stored { raw, ttl }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn delete_if_unchanged(&self, key: &str, seen: &Bytes) -> Result<()> {
        self.cache
            .entry(key.to_owned())
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().raw == *seen => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        Ok(())
    }
}

#[async_trait]
impl EnumerableStore for MokaStore {
    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.cache.iter().map(|(key, _)| key.as_ref().clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

impl Debug for MokaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaStore")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbon::{CacheOperations, TtlOperations, TypedCache};
    use serde::{Deserialize, Serialize};
    use shared::Error;
    use tokio::time::sleep;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        email: String,
    }

    fn profile() -> Profile {
        Profile {
            id: 1,
            email: "ada@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_moka_store_store_and_load() {
        let store = MokaStore::new("test", None);

        store.store("hello", Bytes::from("world"), None).await.unwrap();

        let loaded = store.load("hello").await.unwrap();
        assert_eq!(loaded, Some(Bytes::from("world")));
    }

    #[tokio::test]
    async fn test_moka_store_delete() {
        let store = MokaStore::new("test", None);

        store.store("test_key", Bytes::from("test_value"), None).await.unwrap();
        store.delete("test_key").await.unwrap();

        assert_eq!(store.load("test_key").await.unwrap(), None);
        // Deleting an absent key is not an error
        store.delete("test_key").await.unwrap();
    }

    #[tokio::test]
    async fn test_moka_store_load_nonexistent() {
        let store = MokaStore::new("test", None);
        assert_eq!(store.load("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_moka_store_overwrite() {
        let store = MokaStore::new("test", None);

        store.store("key", Bytes::from("value1"), None).await.unwrap();
        store.store("key", Bytes::from("value2"), None).await.unwrap();

        assert_eq!(store.load("key").await.unwrap(), Some(Bytes::from("value2")));
    }

    #[tokio::test]
    async fn test_moka_store_native_ttl() {
        let store = MokaStore::new("test", None);

        store
            .store("ttl_key", Bytes::from("ttl_value"), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        store.store("forever", Bytes::from("v"), None).await.unwrap();
        assert!(store.load("ttl_key").await.unwrap().is_some());

        sleep(Duration::from_millis(150)).await;

        assert_eq!(store.load("ttl_key").await.unwrap(), None);
        assert!(store.load("forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_moka_store_overwrite_resets_ttl() {
        let store = MokaStore::new("test", None);

        store
            .store("key", Bytes::from("v1"), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        store.store("key", Bytes::from("v2"), None).await.unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(store.load("key").await.unwrap(), Some(Bytes::from("v2")));
    }

    #[tokio::test]
    async fn test_moka_store_delete_if_unchanged() {
        let store = MokaStore::new("test", None);
        store.store("key", Bytes::from("fresh"), None).await.unwrap();

        store.delete_if_unchanged("key", &Bytes::from("stale")).await.unwrap();
        assert_eq!(store.load("key").await.unwrap(), Some(Bytes::from("fresh")));

        store.delete_if_unchanged("key", &Bytes::from("fresh")).await.unwrap();
        assert_eq!(store.load("key").await.unwrap(), None);

        // Absent key is a no-op
        store.delete_if_unchanged("missing", &Bytes::from("x")).await.unwrap();
        assert_eq!(store.load("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_moka_store_bounded() {
        let store = MokaStore::new_bounded(2); // Max 2 entries

        store.store("key1", Bytes::from("value1"), None).await.unwrap();
        store.store("key2", Bytes::from("value2"), None).await.unwrap();
        store.store("key3", Bytes::from("value3"), None).await.unwrap();

        // Let eviction take effect
        store.cache.run_pending_tasks().await;

        let entry_count = store.cache.entry_count();
        assert!(entry_count <= 2, "Store should have at most 2 entries");
    }

    #[tokio::test]
    async fn test_moka_store_keys_and_clear() {
        let store = MokaStore::new("test", None);
        store.store("a", Bytes::from("1"), None).await.unwrap();
        store.store("b", Bytes::from("2"), None).await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
        assert_eq!(store.load("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_cache_ttl_scenario() {
        let cache = TypedCache::<Profile, _>::new(Arc::new(MokaStore::new_bounded(1_000)));

        cache
            .set_with_ttl("user:1", profile(), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(cache.get("user:1").await.unwrap(), profile());

        sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.get("user:1").await, Err(Error::missing("user:1")));
        assert!(!cache.keys().await.unwrap().contains(&"user:1".to_string()));
    }

    #[tokio::test]
    async fn test_typed_cache_eviction_is_a_miss() {
        let store = Arc::new(MokaStore::new_bounded(1));
        let cache = TypedCache::<u64, _>::new(Arc::clone(&store));

        for i in 0..50u64 {
            cache.set(&format!("key{i}"), i).await.unwrap();
        }
        store.cache.run_pending_tasks().await;

        let keys: Vec<String> = (0..50).map(|i| format!("key{i}")).collect();
        let found = cache.get_multi(&keys).await.unwrap();
        assert!(found.len() <= 1);
        assert!(store.cache.entry_count() <= 1);
    }

    #[tokio::test]
    async fn test_typed_cache_get_or_fetch_over_moka() {
        let cache = TypedCache::<Profile, _>::new(Arc::new(MokaStore::new_bounded(100)))
            .with_ttl(Duration::from_secs(60));

        let fetched = cache
            .get_or_fetch("user:1", || async { Ok(profile()) })
            .await
            .unwrap();
        assert_eq!(fetched, profile());

        let cached = cache
            .get_or_fetch("user:1", || async { Err(Error::fetch("must come from cache")) })
            .await
            .unwrap();
        assert_eq!(cached, profile());
    }
}
