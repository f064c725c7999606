//! In-process stand-in for a shared cache, with an outage switch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::DistributedStore;
use crate::error::{CacheError, Result};

/// A distributed store kept in a `HashMap`, honouring absolute expiry.
///
/// `set_available(false)` makes every call fail with `TierUnavailable`.
#[derive(Debug)]
pub struct InMemoryDistributedStore {
    entries: RwLock<HashMap<String, (Bytes, DateTime<Utc>)>>,
    available: AtomicBool,
    writes: AtomicU64,
}

impl Default for InMemoryDistributedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDistributedStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn contains(&self, key: &str) -> bool {
        let entries = self.entries.read().await;
        matches!(entries.get(key), Some((_, expiry)) if *expiry > Utc::now())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::TierUnavailable(
                "in-memory distributed store is offline".to_string(),
            ))
        }
    }
}

#[async_trait]
impl DistributedStore for InMemoryDistributedStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_available()?;

        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((payload, expiry)) if *expiry > now => return Ok(Some(payload.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // expired: drop it under the write lock
        let mut entries = self.entries.write().await;
        if matches!(entries.get(key), Some((_, expiry)) if *expiry <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, payload: Bytes, absolute_expiry: DateTime<Utc>) -> Result<()> {
        self.check_available()?;

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (payload, absolute_expiry));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_available()?;

        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<()> {
        self.check_available()?;

        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}
