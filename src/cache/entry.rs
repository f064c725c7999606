//! Cache Entry Module
//!
//! Defines the immutable entry held by the local tier.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

// == Cache Entry ==
/// A single cached value and its metadata.
///
/// Entries are never edited in place; an overwrite installs a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key the entry is stored under
    pub key: String,
    /// Serialized value, uncompressed
    pub payload: Bytes,
    /// Tags the entry was written with
    pub tags: BTreeSet<String>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration in every tier (Unix milliseconds)
    pub absolute_expiry: u64,
    /// Expiration in the local tier only (Unix milliseconds)
    pub local_expiry: u64,
    /// Unique per constructed entry; tells two writes of one key apart
    pub revision: u64,
    /// True if the entry also lives in the distributed tier
    pub shared: bool,
}

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry stamped with the current time.
    ///
    /// # Arguments
    /// * `expiration` - Lifetime in every tier
    /// * `local_expiration` - Lifetime in the local tier, capped by `expiration`
    pub fn new(
        key: impl Into<String>,
        payload: Bytes,
        tags: BTreeSet<String>,
        expiration: Duration,
        local_expiration: Duration,
    ) -> Self {
        let now = current_timestamp_ms();
        let absolute_expiry = now.saturating_add(duration_ms(expiration));
        Self::restore(key, payload, tags, now, absolute_expiry, local_expiration)
    }

    /// Rebuilds an entry whose creation and absolute expiry are already known,
    /// such as one read back from the distributed tier.
    pub fn restore(
        key: impl Into<String>,
        payload: Bytes,
        tags: BTreeSet<String>,
        created_at: u64,
        absolute_expiry: u64,
        local_expiration: Duration,
    ) -> Self {
        let local_expiry = current_timestamp_ms()
            .saturating_add(duration_ms(local_expiration))
            .min(absolute_expiry);

        Self {
            key: key.into(),
            payload,
            tags,
            created_at,
            absolute_expiry,
            local_expiry,
            revision: NEXT_REVISION.fetch_add(1, Ordering::Relaxed),
            shared: false,
        }
    }

    /// Marks whether the entry is also held by the distributed tier.
    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    // == Is Expired ==
    /// Checks if the entry has expired in the local tier.
    ///
    /// An entry is expired once the current time reaches its local expiry.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.local_expiry
    }

    /// Remaining overall lifetime, zero once elapsed.
    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.absolute_expiry.saturating_sub(current_timestamp_ms()))
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        timestamp_to_utc(self.created_at)
    }

    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        timestamp_to_utc(self.absolute_expiry)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn timestamp_to_utc(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn entry(expiration: Duration, local: Duration) -> CacheEntry {
        CacheEntry::new(
            "k",
            Bytes::from_static(b"\"v\""),
            BTreeSet::new(),
            expiration,
            local,
        )
    }

    #[test]
    fn test_entry_creation() {
        let entry = entry(Duration::from_secs(60), Duration::from_secs(30));

        assert_eq!(entry.key, "k");
        assert!(!entry.is_expired());
        assert_eq!(entry.absolute_expiry - entry.created_at, 60_000);
        assert!(entry.local_expiry <= entry.absolute_expiry);
    }

    #[test]
    fn test_local_expiry_capped_by_absolute() {
        let now = current_timestamp_ms();
        let restored = CacheEntry::restore(
            "k",
            Bytes::new(),
            BTreeSet::new(),
            now,
            now + 1_000,
            Duration::from_secs(3600),
        );

        assert_eq!(restored.local_expiry, now + 1_000);
    }

    #[test]
    fn test_entry_expiration() {
        let entry = entry(Duration::from_secs(10), Duration::from_millis(200));

        assert!(!entry.is_expired());
        sleep(Duration::from_millis(300));
        assert!(entry.is_expired());
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = entry(Duration::from_secs(10), Duration::from_secs(10));
        assert!(entry.is_expired_at(entry.local_expiry));
        assert!(!entry.is_expired_at(entry.local_expiry - 1));
    }

    #[test]
    fn test_revisions_are_unique() {
        let first = entry(Duration::from_secs(60), Duration::from_secs(60));
        let second = entry(Duration::from_secs(60), Duration::from_secs(60));

        assert_ne!(first.revision, second.revision);
        assert!(!first.shared);
        assert!(first.with_shared(true).shared);
    }

    #[test]
    fn test_utc_conversion() {
        let entry = entry(Duration::from_secs(60), Duration::from_secs(60));
        let lifetime = entry.expires_at_utc() - entry.created_at_utc();
        assert_eq!(lifetime.num_seconds(), 60);
    }
}
