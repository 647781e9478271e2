pub mod operation;
mod single_flight;
pub mod typed_cache;

pub use operation::{CacheOperations, TtlOperations};
pub use typed_cache::{CacheValue, TypedCache};
