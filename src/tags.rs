//! Tag Index Module
//!
//! Many-to-many membership between tags and keys, used for bulk invalidation.
//!
//! Every tagged key also carries a lifetime record (its absolute expiry and
//! the revision of the entry that wrote it) so memberships can be released
//! once the entry is gone from every tier.

use std::collections::{BTreeSet, HashMap, HashSet};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cache::ExpiryIndex;

#[derive(Debug, Default)]
struct Lifetimes {
    expiry: ExpiryIndex,
    revisions: HashMap<String, u64>,
}

// == Tag Index ==
/// Tracks tag→keys and key→tags.
///
/// Both maps are sharded, so mutations of one tag serialize on that tag's
/// shard while different tags proceed in parallel. No method holds a guard
/// on one map while touching the other.
#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: DashMap<String, HashSet<String>>,
    by_key: DashMap<String, HashSet<String>>,
    lifetimes: Mutex<Lifetimes>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // == Associate ==
    pub fn associate(&self, tag: &str, key: &str) {
        self.by_tag
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        self.by_key
            .entry(key.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    // == Disassociate ==
    /// Removes one membership; empty records are dropped.
    pub fn disassociate(&self, tag: &str, key: &str) {
        if let Some(mut keys) = self.by_tag.get_mut(tag) {
            keys.remove(key);
        }
        self.by_tag.remove_if(tag, |_, keys| keys.is_empty());

        if let Some(mut tags) = self.by_key.get_mut(key) {
            tags.remove(tag);
        }
        self.by_key.remove_if(key, |_, tags| tags.is_empty());
    }

    // == Replace Tags ==
    /// Makes `tags` the complete tag set of `key`.
    ///
    /// Called on every overwrite so a key leaves the tags it no longer carries.
    pub fn replace_tags(&self, key: &str, tags: &BTreeSet<String>) {
        for old in self.tags_for_key(key) {
            if !tags.contains(&old) {
                self.disassociate(&old, key);
            }
        }
        for tag in tags {
            self.associate(tag, key);
        }
    }

    // == Record ==
    /// Makes `tags` the tag set of `key` as written by the entry with
    /// `revision`, which lives in the distributed tier until `absolute_expiry`.
    ///
    /// An untagged key keeps no lifetime record.
    pub fn record(&self, key: &str, tags: &BTreeSet<String>, absolute_expiry: u64, revision: u64) {
        self.replace_tags(key, tags);
        if tags.is_empty() {
            self.untrack(key);
        } else {
            self.track(key, absolute_expiry, revision);
        }
    }

    /// Sets the lifetime record of `key` without touching its memberships.
    pub fn track(&self, key: &str, absolute_expiry: u64, revision: u64) {
        let mut lifetimes = self.lifetimes.lock();
        lifetimes.expiry.insert(key, absolute_expiry);
        lifetimes.revisions.insert(key.to_string(), revision);
    }

    fn untrack(&self, key: &str) {
        let mut lifetimes = self.lifetimes.lock();
        lifetimes.expiry.remove(key);
        lifetimes.revisions.remove(key);
    }

    /// Drops every membership and the lifetime record of `key`.
    pub fn forget_key(&self, key: &str) {
        self.replace_tags(key, &BTreeSet::new());
        self.untrack(key);
    }

    /// True if the current memberships of `key` were written by `revision`.
    pub fn written_by(&self, key: &str, revision: u64) -> bool {
        self.lifetimes.lock().revisions.get(key) == Some(&revision)
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.lifetimes.lock().expiry.contains(key)
    }

    pub fn expiry_of(&self, key: &str) -> Option<u64> {
        self.lifetimes.lock().expiry.expiry_of(key)
    }

    // == Drain Expired ==
    /// Removes and returns the lifetime records of keys whose absolute
    /// expiry is at or before `now_ms`.
    ///
    /// Memberships are left alone; the caller forgets each key once it has
    /// confirmed no newer write re-tracked it.
    pub fn drain_expired(&self, now_ms: u64) -> Vec<String> {
        let mut lifetimes = self.lifetimes.lock();
        let expired = lifetimes.expiry.drain_expired(now_ms);
        for key in &expired {
            lifetimes.revisions.remove(key);
        }
        expired
    }

    /// Number of keys with a lifetime record.
    pub fn tracked_count(&self) -> usize {
        self.lifetimes.lock().expiry.len()
    }

    pub fn keys_for_tag(&self, tag: &str) -> HashSet<String> {
        self.by_tag
            .get(tag)
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    pub fn tags_for_key(&self, key: &str) -> HashSet<String> {
        self.by_key
            .get(key)
            .map(|tags| tags.clone())
            .unwrap_or_default()
    }

    // == Remove Tag ==
    /// Atomically takes and clears the key set of `tag`.
    ///
    /// The returned keys also lose `tag` from their reverse records.
    pub fn remove_tag(&self, tag: &str) -> HashSet<String> {
        let keys = self
            .by_tag
            .remove(tag)
            .map(|(_, keys)| keys)
            .unwrap_or_default();

        for key in &keys {
            if let Some(mut tags) = self.by_key.get_mut(key) {
                tags.remove(tag);
            }
            self.by_key.remove_if(key, |_, tags| tags.is_empty());
        }
        keys
    }

    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }
}
