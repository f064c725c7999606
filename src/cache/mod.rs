//! Cache Module
//!
//! The in-process tier: immutable entries, expiry ordering, the local store
//! and shared statistics.

mod entry;
mod expiry;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub(crate) use entry::timestamp_to_utc;
pub use expiry::ExpiryIndex;
pub use stats::{CacheStats, StatsRecorder};
pub use store::{LocalStore, Lookup};
