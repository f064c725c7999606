//! Local Store Module
//!
//! In-process tier: a key→entry table with lazy expiration, an expiry sweep,
//! and capacity eviction that drops the earliest-expiring entry first.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, ExpiryIndex};

// == Lookup ==
/// Result of a local lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(Arc<CacheEntry>),
    /// The entry had expired and was removed by this lookup
    Expired(Arc<CacheEntry>),
    Miss,
}

impl Lookup {
    pub fn hit(self) -> Option<Arc<CacheEntry>> {
        match self {
            Lookup::Hit(entry) => Some(entry),
            _ => None,
        }
    }
}

// == Local Store ==
/// The fast, in-process tier.
///
/// Entries are shared as `Arc<CacheEntry>` and replaced on overwrite, so a
/// reader holding an entry never observes a partial update.
#[derive(Debug)]
pub struct LocalStore {
    /// Key-entry storage
    entries: HashMap<String, Arc<CacheEntry>>,
    /// Expiry ordering used by sweeps and eviction
    expiry: ExpiryIndex,
    /// Maximum number of entries allowed
    max_entries: usize,
}

impl LocalStore {
    // == Constructor ==
    /// Creates a new LocalStore holding at most `max_entries` entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            expiry: ExpiryIndex::new(),
            max_entries,
        }
    }

    // == Get ==
    /// Looks up `key`.
    ///
    /// An expired entry is dropped on the spot and handed back as
    /// [`Lookup::Expired`] so the caller can release anything tied to it.
    pub fn get(&mut self, key: &str) -> Lookup {
        let Some(entry) = self.entries.get(key) else {
            return Lookup::Miss;
        };
        if !entry.is_expired() {
            return Lookup::Hit(Arc::clone(entry));
        }

        self.expiry.remove(key);
        match self.entries.remove(key) {
            Some(expired) => Lookup::Expired(expired),
            None => Lookup::Miss,
        }
    }

    /// Returns the live entry for `key` without dropping an expired one.
    pub fn peek(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    // == Put ==
    /// Stores an entry, replacing any previous entry for the same key.
    ///
    /// If the store is full and the key is new, expired entries are swept
    /// first and then the earliest-expiring entries are evicted.
    ///
    /// # Returns
    /// The entries dropped to make room, expired ones included.
    pub fn put(&mut self, entry: Arc<CacheEntry>) -> Vec<Arc<CacheEntry>> {
        let mut dropped = Vec::new();

        if !self.entries.contains_key(&entry.key) && self.entries.len() >= self.max_entries {
            dropped = self.sweep_expired();
            while self.entries.len() >= self.max_entries {
                let Some(victim) = self.expiry.pop_earliest() else {
                    break;
                };
                if let Some(evicted) = self.entries.remove(&victim) {
                    dropped.push(evicted);
                }
            }
        }

        self.expiry.insert(&entry.key, entry.local_expiry);
        self.entries.insert(entry.key.clone(), entry);

        dropped
    }

    // == Remove ==
    /// Removes an entry by key, returning true if one was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.expiry.remove(key);
        self.entries.remove(key).is_some()
    }

    /// Removes every listed key, returning how many were present.
    pub fn remove_all<S: AsRef<str>>(&mut self, keys: &[S]) -> usize {
        keys.iter().filter(|key| self.remove(key.as_ref())).count()
    }

    // == Sweep Expired ==
    /// Removes all expired entries from the store.
    ///
    /// Returns the removed entries.
    pub fn sweep_expired(&mut self) -> Vec<Arc<CacheEntry>> {
        self.expiry
            .drain_expired(current_timestamp_ms())
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    // == Length ==
    /// Returns the current number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }
}
