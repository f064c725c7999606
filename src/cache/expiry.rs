//! Expiry Index Module
//!
//! Orders local keys by expiry so eviction and sweeps start with the entry
//! that dies first.

use std::collections::{BTreeSet, HashMap};

// == Expiry Index ==
/// Tracks local expiry timestamps for eviction.
///
/// `order` holds `(expiry, key)` pairs sorted earliest first; `by_key` finds a
/// key's current slot so re-inserting replaces it.
#[derive(Debug, Default)]
pub struct ExpiryIndex {
    order: BTreeSet<(u64, String)>,
    by_key: HashMap<String, u64>,
}

impl ExpiryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // == Insert ==
    /// Records `key` as expiring at `expires_at`, replacing any earlier record.
    pub fn insert(&mut self, key: &str, expires_at: u64) {
        self.remove(key);
        self.order.insert((expires_at, key.to_string()));
        self.by_key.insert(key.to_string(), expires_at);
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        if let Some(expires_at) = self.by_key.remove(key) {
            self.order.remove(&(expires_at, key.to_string()));
        }
    }

    // == Pop Earliest ==
    /// Returns and removes the key that expires first.
    pub fn pop_earliest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.by_key.remove(&key);
        Some(key)
    }

    /// Returns the key that expires first without removing it.
    pub fn peek_earliest(&self) -> Option<(u64, &str)> {
        self.order
            .first()
            .map(|(expires_at, key)| (*expires_at, key.as_str()))
    }

    // == Drain Expired ==
    /// Removes and returns every key whose expiry is at or before `now_ms`.
    pub fn drain_expired(&mut self, now_ms: u64) -> Vec<String> {
        let mut expired = Vec::new();
        while let Some((expires_at, _)) = self.peek_earliest() {
            if expires_at > now_ms {
                break;
            }
            if let Some(key) = self.pop_earliest() {
                expired.push(key);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn expiry_of(&self, key: &str) -> Option<u64> {
        self.by_key.get(key).copied()
    }
}
