//! Typed caching over interchangeable backend stores.
//!
//! [`TypedCache`] wraps any [`CacheStore`](ports::CacheStore) with TTL envelopes
//! and single-flight fetching. Concrete stores live in `storage-engine` (local)
//! and `server-tcp` (remote).

pub mod cache;
pub mod clock;
pub mod domain;
pub mod ports;

pub use cache::{CacheOperations, CacheValue, TtlOperations, TypedCache};
