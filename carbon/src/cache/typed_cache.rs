use crate::cache::operation::{CacheOperations, TtlOperations};
use crate::cache::single_flight::{Claim, SingleFlight};
use crate::clock::{Clock, SystemClock};
use crate::domain::Entry;
use crate::ports::{CacheStore, EnumerableStore};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Anything that can be cached: it crosses the store as JSON and is handed
/// to every caller waiting on the same fetch.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Typed facade over an untyped [`CacheStore`]
///
/// Values are wrapped in an [`Entry`] carrying their write time and TTL, and
/// expired or undecodable entries are removed when they are next read.
/// Concurrent [`TypedCache::get_or_fetch`] calls for a missing key share a
/// single fetch.
pub struct TypedCache<T, S>
where
    S: CacheStore + ?Sized,
{
    store: Arc<S>,
    default_ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    in_flight: SingleFlight<T>,
}

impl<T, S> TypedCache<T, S>
where
    T: CacheValue,
    S: CacheStore + ?Sized,
{
    /// Cache with no default TTL: entries written through `set` never expire
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            default_ttl: None,
            clock: Arc::new(SystemClock),
            in_flight: SingleFlight::new(),
        }
    }

    /// Only entries written after this call pick up the new TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn without_ttl(mut self) -> Self {
        self.default_ttl = None;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Number of fetch rounds currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Return the live value for `key`, or compute it with `fetch`.
    ///
    /// For a given key at most one `fetch` runs at a time; callers arriving
    /// while it runs wait for it and get the same value or error. A fetched
    /// value is stored with the default TTL before any caller sees it. Only a
    /// miss triggers a fetch: store failures and undecodable entries are
    /// returned as errors.
    ///
    /// The round runs on its own Tokio task, so a caller that stops waiting
    /// (for instance through `tokio::time::timeout`) does not cancel it.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match read_live::<T, S>(&*self.store, self.clock.as_ref(), key).await {
            Err(err) if err.is_missing() => {}
            outcome => return outcome,
        }

        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let ttl = self.default_ttl;
        let round_key = key.to_owned();

        let claim = self.in_flight.claim(key, move |guard| {
            async move {
                let _guard = guard;

                // Re-check now that this round owns the key: another round may
                // have stored the value between our first read and the claim.
                match read_live::<T, S>(&*store, clock.as_ref(), &round_key).await {
                    Err(err) if err.is_missing() => {}
                    outcome => return outcome,
                }

                debug!(key = %round_key, "cache miss, fetching");
                let value = fetch().await?;
                if let Err(err) = write_entry(&*store, clock.as_ref(), &round_key, &value, ttl).await
                {
                    warn!(key = %round_key, error = %err, "fetched value could not be stored");
                }
                Ok(value)
            }
            .boxed()
        });

        match claim {
            Claim::Leader(round) => {
                tokio::spawn(round.clone());
                round.await
            }
            Claim::Follower(round) => {
                debug!(key, "waiting on in-flight fetch");
                round.await
            }
        }
    }
}

impl<T, S> TypedCache<T, S>
where
    T: CacheValue,
    S: EnumerableStore + ?Sized,
{
    /// Keys currently held by the store, including ones not yet lazily expired
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.store.keys().await
    }

    /// Drop every stored entry. Fetch rounds already running are left alone.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }
}

impl<T, S> Clone for TypedCache<T, S>
where
    S: CacheStore + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            default_ttl: self.default_ttl,
            clock: Arc::clone(&self.clock),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<T, S> Debug for TypedCache<T, S>
where
    S: CacheStore + ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedCache")
            .field("default_ttl", &self.default_ttl)
            .field("store", &"<dyn CacheStore>")
            .finish()
    }
}

#[async_trait]
impl<T, S> CacheOperations<T> for TypedCache<T, S>
where
    T: CacheValue,
    S: CacheStore + ?Sized,
{
    async fn get(&self, key: &str) -> Result<T> {
        read_live::<T, S>(&*self.store, self.clock.as_ref(), key).await
    }

    async fn set(&self, key: &str, value: T) -> Result<()> {
        write_entry(&*self.store, self.clock.as_ref(), key, &value, self.default_ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }
}

#[async_trait]
impl<T, S> TtlOperations<T> for TypedCache<T, S>
where
    T: CacheValue,
    S: CacheStore + ?Sized,
{
    async fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) -> Result<()> {
        write_entry(&*self.store, self.clock.as_ref(), key, &value, Some(ttl)).await
    }
}

async fn read_live<T, S>(store: &S, clock: &dyn Clock, key: &str) -> Result<T>
where
    T: DeserializeOwned,
    S: CacheStore + ?Sized,
{
    let Some(raw) = store.load(key).await? else {
        return Err(Error::missing(key));
    };

    let entry = match serde_json::from_slice::<Entry<T>>(&raw) {
        Ok(entry) => entry,
        Err(err) => {
            let cause = err.to_string();
            warn!(key, error = %cause, "dropping entry that does not decode as the cached type");
            if let Err(err) = store.delete_if_unchanged(key, &raw).await {
                warn!(key, error = %err, "failed to drop undecodable entry");
            }
            return Err(Error::failed_to_cast(key, Some(cause)));
        }
    };

    if !entry.is_live(clock.now()) {
        debug!(key, "entry expired");
        if let Err(err) = store.delete_if_unchanged(key, &raw).await {
            warn!(key, error = %err, "failed to drop expired entry");
        }
        return Err(Error::missing(key));
    }

    Ok(entry.into_value())
}

async fn write_entry<T, S>(
    store: &S,
    clock: &dyn Clock,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()>
where
    T: Serialize + Sync,
    S: CacheStore + ?Sized,
{
    let raw = serde_json::to_vec(&Entry::wrap(value, ttl, clock.now()))
        .map_err(|e| Error::Internal(format!("Failed to encode entry for key {key}: {e}")))?;
    store.store(key, Bytes::from(raw), ttl).await
}
