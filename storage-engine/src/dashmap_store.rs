use async_trait::async_trait;
use bytes::Bytes;
use carbon::ports::{CacheStore, EnumerableStore};
use dashmap::DashMap;
use shared::Result;
use std::fmt::Debug;
use std::time::Duration;

/// Unbounded concurrent map store
///
/// Never evicts: entries stay until deleted or cleared. TTL hints are ignored,
/// expiry is left to the typed layer reading the entries.
#[derive(Default)]
pub struct DashMapStore {
    entries: DashMap<String, Bytes>,
}

impl DashMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for DashMapStore {
    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.get(key).map(|raw| raw.value().clone()))
    }

    async fn store(&self, key: &str, raw: Bytes, _ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(key.to_owned(), raw);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_if_unchanged(&self, key: &str, seen: &Bytes) -> Result<()> {
        self.entries.remove_if(key, |_, current| current == seen);
        Ok(())
    }
}

#[async_trait]
impl EnumerableStore for DashMapStore {
    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

impl Debug for DashMapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashMapStore")
            .field("entry_count", &self.entries.len())
            .finish()
    }
}
