// shared/src/lib.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("key {0} is missing")]
    MissingEntry(String),
    #[error("could not cast value for key {key}: {}", .cause.as_deref().unwrap_or("stored value could not be cast to output type"))]
    FailedToCastEntry { key: String, cause: Option<String> },
    #[error("backend: {0}")]
    Backend(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub fn missing(key: impl Into<String>) -> Self {
        Error::MissingEntry(key.into())
    }

    pub fn failed_to_cast(key: impl Into<String>, cause: Option<String>) -> Self {
        Error::FailedToCastEntry {
            key: key.into(),
            cause,
        }
    }

    /// Wrap any displayable failure coming out of a caller's fetch function
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        Error::Fetch(err.to_string())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Error::MissingEntry(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Time-to-live in milliseconds, as carried in stored envelopes and on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlMs(pub u64);

impl From<Duration> for TtlMs {
    fn from(ttl: Duration) -> Self {
        TtlMs(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }
}

impl From<TtlMs> for Duration {
    fn from(ttl: TtlMs) -> Self {
        Duration::from_millis(ttl.0)
    }
}

pub mod config;
