pub mod dashmap_store;
pub mod moka_store;

pub use dashmap_store::DashMapStore;
pub use moka_store::MokaStore;

use carbon::domain::{BackendKind, CacheConfig};
use carbon::ports::{CacheStore, StorageFactory};
use shared::{Error, Result};
use std::sync::Arc;

/// Builds the in-process stores: unbounded map or bounded Moka cache
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalStorageFactory;

impl StorageFactory for LocalStorageFactory {
    fn create_from_config(&self, config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
        match config.backend {
            BackendKind::Unbounded => {
                tracing::info!(cache = %config.name, "creating unbounded store");
                Ok(Arc::new(DashMapStore::new()))
            }
            BackendKind::Bounded => {
                let capacity = config.max_entries.ok_or_else(|| {
                    Error::Config(format!("bounded cache '{}' needs max_entries", config.name))
                })?;
                tracing::info!(cache = %config.name, capacity, "creating bounded store");
                Ok(Arc::new(MokaStore::new(&config.name, Some(capacity))))
            }
            BackendKind::Remote => Err(Error::Config(format!(
                "cache '{}' is remote, connect with RemoteStore instead",
                config.name
            ))),
        }
    }
}
