#![deny(clippy::all)]

use crate::domain::CacheConfig;
use async_trait::async_trait;
use bytes::Bytes;
use shared::Result;
use std::sync::Arc;
use std::time::Duration;

// Ports are the pluggable extension points for underlying storage implementations

/// Port for creating backend storage from configuration
pub trait StorageFactory: Send + Sync + 'static {
    fn create_from_config(&self, config: &CacheConfig) -> Result<Arc<dyn CacheStore>>;
}

/// Untyped key/value storage behind a typed cache
///
/// Every operation is atomic per key. `ttl` on `store` is a hint for stores that
/// expire entries natively; the typed layer enforces expiry on its own either way.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// `Ok(None)` means the store holds nothing under `key`
    async fn load(&self, key: &str) -> Result<Option<Bytes>>;
    async fn store(&self, key: &str, raw: Bytes, ttl: Option<Duration>) -> Result<()>;
    /// Removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove `key` only while it still holds `seen`.
    /// Stores without an atomic compare fall back to a plain delete.
    async fn delete_if_unchanged(&self, key: &str, _seen: &Bytes) -> Result<()> {
        self.delete(key).await
    }
}

/// Stores that can list and drop their whole contents
#[async_trait]
pub trait EnumerableStore: CacheStore {
    /// Best effort snapshot, unordered
    async fn keys(&self) -> Result<Vec<String>>;
    async fn clear(&self) -> Result<()>;
}
