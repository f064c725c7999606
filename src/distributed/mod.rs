//! Distributed Store Module
//!
//! The shared tier is an opaque byte-blob service. The engine only moves
//! envelopes produced by the entry codec through it and never inspects them.

mod memory;

pub use memory::InMemoryDistributedStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::Result;

// == Distributed Store Trait ==
/// Adapter for an external shared cache.
///
/// Implementations report transport problems as
/// [`crate::CacheError::TierUnavailable`]; the engine degrades to local-only
/// behaviour for that call instead of failing the caller.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// Returns the stored bytes, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Stores `payload` until `absolute_expiry`.
    async fn set(&self, key: &str, payload: Bytes, absolute_expiry: DateTime<Utc>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Removes several keys. The default issues one `remove` per key and
    /// stops at the first failure.
    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove(key).await?;
        }
        Ok(())
    }
}
