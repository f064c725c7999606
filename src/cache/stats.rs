//! Cache Statistics Module
//!
//! Tracks how requests were served across both tiers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of cache activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Lookups answered by the local tier
    pub local_hits: u64,
    /// Lookups answered by the distributed tier
    pub distributed_hits: u64,
    /// Lookups neither tier could answer
    pub misses: u64,
    /// Factory executions
    pub factory_calls: u64,
    /// Callers that joined an in-flight fetch instead of running the factory
    pub coalesced_waiters: u64,
    /// Local entries evicted to respect capacity
    pub evictions: u64,
    /// Local entries removed by expiry sweeps
    pub expired: u64,
    /// Distributed-tier calls that failed and were degraded to local-only
    pub distributed_failures: u64,
    /// Current number of entries in the local tier
    pub local_entries: usize,
    /// Invalidation counts per tag, only kept when tag reporting is enabled
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tag_invalidations: BTreeMap<String, u64>,
}

impl CacheStats {
    // == Hit Rate ==
    /// Calculates the combined hit rate of both tiers.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits + self.distributed_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

// == Stats Recorder ==
/// Lock-free counters shared by every caller of one cache instance.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    local_hits: AtomicU64,
    distributed_hits: AtomicU64,
    misses: AtomicU64,
    factory_calls: AtomicU64,
    coalesced_waiters: AtomicU64,
    evictions: AtomicU64,
    expired: AtomicU64,
    distributed_failures: AtomicU64,
    tag_invalidations: DashMap<String, u64>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_distributed_hit(&self) {
        self.distributed_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_factory_call(&self) {
        self.factory_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced_waiters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: usize) {
        self.expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_distributed_failure(&self) {
        self.distributed_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tag_invalidation(&self, tag: &str) {
        *self.tag_invalidations.entry(tag.to_string()).or_insert(0) += 1;
    }

    // == Snapshot ==
    /// Copies the counters into a serializable snapshot.
    pub fn snapshot(&self, local_entries: usize) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            factory_calls: self.factory_calls.load(Ordering::Relaxed),
            coalesced_waiters: self.coalesced_waiters.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            distributed_failures: self.distributed_failures.load(Ordering::Relaxed),
            local_entries,
            tag_invalidations: self
                .tag_invalidations
                .iter()
                .map(|item| (item.key().clone(), *item.value()))
                .collect(),
        }
    }
}
