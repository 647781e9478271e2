use crate::domain::StorageItem;
use async_trait::async_trait;
use shared::{Error, Result};
use std::time::Duration;
use tracing::warn;

/// Typed cache operations over string keys
#[async_trait]
pub trait CacheOperations<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn get(&self, key: &str) -> Result<T>;

    /// Stores with the cache's default TTL, overwriting any previous value
    async fn set(&self, key: &str, value: T) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Returns values for the keys that are present.
    /// The result may be shorter than `keys`; absent keys are not an error.
    async fn get_multi(&self, keys: &[String]) -> Result<Vec<StorageItem<T>>> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get(key).await {
                Ok(value) => items.push(StorageItem::new(key.clone(), value)),
                // Corrupt entries were already dropped by `get`
                Err(Error::MissingEntry(_)) | Err(Error::FailedToCastEntry { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(items)
    }

    async fn set_multi(&self, items: Vec<StorageItem<T>>) -> Result<()> {
        let mut first_error = None;
        for item in items {
            if let Err(err) = self.set(&item.key, item.value).await {
                warn!(key = %item.key, error = %err, "bulk set failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Operations that take an explicit per-entry TTL
#[async_trait]
pub trait TtlOperations<T>: CacheOperations<T>
where
    T: Send + 'static,
{
    async fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) -> Result<()>;

    async fn set_multi_with_ttl(&self, items: Vec<StorageItem<T>>, ttl: Duration) -> Result<()> {
        let mut first_error = None;
        for item in items {
            if let Err(err) = self.set_with_ttl(&item.key, item.value, ttl).await {
                warn!(key = %item.key, error = %err, "bulk set with ttl failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
