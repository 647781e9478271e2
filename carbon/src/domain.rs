use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use shared::{Error, TtlMs};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Envelope persisted in a backend store around every cached value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry<T> {
    pub value: T,
    pub updated_at: DateTime<Utc>,
    /// `None` = never expires
    pub ttl: Option<TtlMs>,
}

impl<T> Entry<T> {
    pub fn wrap(value: T, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        Self {
            value,
            updated_at: now,
            ttl: ttl.map(TtlMs::from),
        }
    }

    /// An entry is live while `now < updated_at + ttl`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        let Some(TtlMs(ttl_ms)) = self.ttl else {
            return true;
        };

        let ttl = i64::try_from(ttl_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds);
        match ttl.and_then(|ttl| self.updated_at.checked_add_signed(ttl)) {
            Some(expires_at) => now < expires_at,
            // Past the representable range, treat as never expiring
            None => true,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Key/value pair used by the bulk operations
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageItem<T> {
    pub key: String,
    pub value: T,
}

impl<T> StorageItem<T> {
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

pub fn as_map<T>(items: Vec<StorageItem<T>>) -> HashMap<String, T> {
    items.into_iter().map(|item| (item.key, item.value)).collect()
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub name: String,                // unique cache name
    pub backend: BackendKind,        // storage realization
    pub max_entries: Option<u64>,    // required for bounded stores
    pub default_ttl_ms: Option<u64>, // None = entries never expire
}

impl CacheConfig {
    pub fn new(
        name: impl Into<String>,
        backend: BackendKind,
        max_entries: Option<u64>,
        default_ttl_ms: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            max_entries,
            default_ttl_ms,
        }
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_ms.map(Duration::from_millis)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Unbounded,
    Bounded,
    Remote,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unbounded" | "inmem" | "dashmap" => Ok(BackendKind::Unbounded),
            "bounded" | "lru" | "tinylfu" | "moka" => Ok(BackendKind::Bounded),
            "remote" | "tcp" => Ok(BackendKind::Remote),
            other => Err(Error::Config(format!("unknown backend kind '{other}'"))),
        }
    }
}
