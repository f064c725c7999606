//! Fetch Coordinator Module
//!
//! Runs the read-through / write-through protocol across both tiers:
//!
//! ```text
//! get_or_create: local → distributed → single-flight → factory
//!                                         ↓ success
//!                          serialize → local + distributed + tag index
//! ```
//!
//! Writes to one key (`set`, a successful fetch, `remove`) are serialized on
//! the key's stripe, so the last one to complete wins in both tiers. A `set`
//! or `remove` supersedes any fetch in flight for the key; that fetch still
//! answers its waiters but its result is never stored.

mod flight;
mod stripes;

pub use flight::{FetchOutcome, Flight, FlightOwner, PendingFetch, SingleFlight};
pub use stripes::KeyStripes;

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{
    current_timestamp_ms, timestamp_to_utc, CacheEntry, CacheStats, LocalStore, Lookup,
    StatsRecorder,
};
use crate::codec::{EntryCodec, Envelope};
use crate::config::{CacheConfig, TagConsistency};
use crate::distributed::DistributedStore;
use crate::error::{CacheError, Result};
use crate::options::ResolvedOptions;
use crate::tags::TagIndex;

// == Removal Report ==
/// Outcome of a bulk removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RemovalReport {
    /// Keys removed from the local tier and the tag index
    pub removed_keys: Vec<String>,
    /// Keys the distributed tier failed to confirm removing
    pub unconfirmed_keys: Vec<String>,
}

impl RemovalReport {
    /// True when both tiers confirmed every removal.
    pub fn is_consistent(&self) -> bool {
        self.unconfirmed_keys.is_empty()
    }

    pub fn merge(&mut self, other: RemovalReport) {
        self.removed_keys.extend(other.removed_keys);
        self.unconfirmed_keys.extend(other.unconfirmed_keys);
    }
}

// == Fetch Coordinator ==
/// Composes the local tier, the distributed adapter, the tag index, the codec
/// and the single-flight table.
pub struct FetchCoordinator {
    local: Mutex<LocalStore>,
    distributed: Option<Arc<dyn DistributedStore>>,
    tags: TagIndex,
    codec: EntryCodec,
    flights: SingleFlight,
    stripes: KeyStripes,
    stats: StatsRecorder,
    tag_consistency: TagConsistency,
    report_tag_metrics: bool,
}

impl FetchCoordinator {
    pub fn new(
        config: &CacheConfig,
        distributed: Option<Arc<dyn DistributedStore>>,
        codec: EntryCodec,
    ) -> Self {
        Self {
            local: Mutex::new(LocalStore::new(config.local_capacity)),
            distributed,
            tags: TagIndex::new(),
            codec,
            flights: SingleFlight::new(),
            stripes: KeyStripes::default(),
            stats: StatsRecorder::new(),
            tag_consistency: config.tag_consistency,
            report_tag_metrics: config.report_tag_metrics,
        }
    }

    pub fn tags(&self) -> &TagIndex {
        &self.tags
    }

    pub fn flights(&self) -> &SingleFlight {
        &self.flights
    }

    pub fn stats(&self) -> CacheStats {
        let local_entries = self.local.lock().len();
        self.stats.snapshot(local_entries)
    }

    /// Looks only at the local tier, without touching statistics.
    pub fn peek_local(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.local.lock().peek(key)
    }

    /// Live local entry for `key`; an expired one is dropped and released.
    async fn local_entry(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let lookup = self.local.lock().get(key);
        match lookup {
            Lookup::Hit(entry) => Some(entry),
            Lookup::Expired(entry) => {
                self.release_dropped(vec![entry]).await;
                None
            }
            Lookup::Miss => None,
        }
    }

    // == Get Or Create ==
    /// Returns the cached value for `key`, running `factory` at most once
    /// across every concurrent caller on a miss.
    ///
    /// Inputs are expected to be validated by the facade.
    pub async fn get_or_create<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: ResolvedOptions,
        tags: BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        if let Some(payload) = self.read_tiers(key, &options, cancel).await? {
            return self.codec.deserialize(&payload);
        }
        self.stats.record_miss();

        match self.flights.join(key) {
            Flight::Waiter(fetch) => {
                self.stats.record_coalesced();
                debug!(key, "joining in-flight fetch");
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => Err(CacheError::Cancelled),
                    outcome = fetch.wait() => outcome,
                };
                self.codec.deserialize(&outcome?)
            }
            Flight::Owner(owner) => self.run_factory(key, owner, factory, options, tags, cancel).await,
        }
    }

    async fn run_factory<T, F, Fut>(
        &self,
        key: &str,
        owner: FlightOwner,
        factory: F,
        options: ResolvedOptions,
        tags: BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        // a previous owner may have finished between our miss and registering
        if options.local_read() {
            if let Some(entry) = self.local_entry(key).await {
                self.stats.record_local_hit();
                owner.resolve(Ok(entry.payload.clone()));
                return self.codec.deserialize(&entry.payload);
            }
        }

        self.stats.record_factory_call();
        debug!(key, "invoking factory");

        let produced = tokio::select! {
            _ = cancel.cancelled() => None,
            produced = factory(cancel.clone()) => Some(produced),
        };

        let Some(produced) = produced else {
            debug!(key, "fetch owner cancelled");
            owner.resolve(Err(CacheError::Cancelled));
            return Err(CacheError::Cancelled);
        };

        let value = match produced {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "factory failed");
                let err = CacheError::Factory(Arc::new(err));
                owner.resolve(Err(err.clone()));
                return Err(err);
            }
        };

        let payload = match self.codec.serialize(&value) {
            Ok(payload) => payload,
            Err(err) => {
                owner.resolve(Err(err.clone()));
                return Err(err);
            }
        };

        self.write(key, payload.clone(), &tags, &options, Some(owner.fetch()))
            .await;
        owner.resolve(Ok(payload));
        Ok(value)
    }

    // == Read Tiers ==
    /// Local lookup, then distributed lookup with local promotion.
    async fn read_tiers(
        &self,
        key: &str,
        options: &ResolvedOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>> {
        if options.local_read() {
            if let Some(entry) = self.local_entry(key).await {
                self.stats.record_local_hit();
                debug!(key, "local hit");
                return Ok(Some(entry.payload.clone()));
            }
        }

        let Some(store) = self.distributed.as_ref().filter(|_| options.distributed_read()) else {
            return Ok(None);
        };

        let generation = self.stripes.generation(key);
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
            fetched = store.get(key) => fetched,
        };

        let bytes = match fetched {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.tier_failure("get", key, &err);
                return Ok(None);
            }
        };

        let envelope = match self.codec.open(&bytes) {
            Ok(envelope) if !envelope.is_expired_at(current_timestamp_ms()) => envelope,
            Ok(_) => {
                debug!(key, "distributed entry already expired");
                return Ok(None);
            }
            Err(err) => {
                warn!(key, error = %err, "discarding undecodable distributed payload");
                return Ok(None);
            }
        };

        self.stats.record_distributed_hit();
        debug!(key, "distributed hit");
        let payload = envelope.body.clone();
        if options.local_write() {
            self.promote(key, envelope, options, generation).await;
        }
        Ok(Some(payload))
    }

    /// Copies a distributed entry into the local tier unless a write to the
    /// key's stripe happened since the distributed read started.
    async fn promote(&self, key: &str, envelope: Envelope, options: &ResolvedOptions, generation: u64) {
        let dropped = {
            let _guard = self.stripes.lock(key).await;
            if self.stripes.generation(key) != generation {
                debug!(key, "skipping promotion; key was written meanwhile");
                return;
            }

            let entry = CacheEntry::restore(
                key,
                envelope.body,
                envelope.tags,
                envelope.created_at,
                envelope.absolute_expiry,
                options.local_expiration,
            )
            .with_shared(true);
            self.tags.record(key, &entry.tags, entry.absolute_expiry, entry.revision);
            self.local.lock().put(Arc::new(entry))
        };
        self.release_dropped(dropped).await;
    }

    // == Set ==
    /// Write-through of an explicit value; supersedes any in-flight fetch.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: ResolvedOptions,
        tags: BTreeSet<String>,
    ) -> Result<()> {
        let payload = self.codec.serialize(value)?;
        self.write(key, payload, &tags, &options, None).await;
        Ok(())
    }

    // == Write ==
    /// Installs a new entry in both tiers and the tag index.
    ///
    /// `fetch` is the fetch producing the value, if any; a superseded fetch
    /// writes nothing. Without a fetch the write is an explicit `set` and
    /// supersedes whatever is in flight.
    async fn write(
        &self,
        key: &str,
        payload: Bytes,
        tags: &BTreeSet<String>,
        options: &ResolvedOptions,
        fetch: Option<&PendingFetch>,
    ) {
        let dropped = self.write_locked(key, payload, tags, options, fetch).await;
        // other keys' stripes are only taken once ours is released
        self.release_dropped(dropped).await;
    }

    /// Body of [`FetchCoordinator::write`] run under the key's stripe.
    ///
    /// Returns the local entries the write pushed out.
    async fn write_locked(
        &self,
        key: &str,
        payload: Bytes,
        tags: &BTreeSet<String>,
        options: &ResolvedOptions,
        fetch: Option<&PendingFetch>,
    ) -> Vec<Arc<CacheEntry>> {
        let _guard = self.stripes.lock_for_write(key).await;

        match fetch {
            Some(fetch) if fetch.is_superseded() => {
                debug!(key, "discarding result of superseded fetch");
                return Vec::new();
            }
            Some(_) => {}
            None => {
                if self.flights.supersede(key) {
                    debug!(key, "set superseded an in-flight fetch");
                }
            }
        }

        if options.expiration.is_zero() {
            // an entry that is already expired replaces whatever was cached
            self.tags.forget_key(key);
            self.local.lock().remove(key);
            self.remove_distributed(std::slice::from_ref(&key.to_string())).await;
            return Vec::new();
        }

        let distributed = self.distributed.as_ref().filter(|_| options.distributed_write());
        let entry = Arc::new(
            CacheEntry::new(
                key,
                payload,
                tags.clone(),
                options.expiration,
                options.local_expiration,
            )
            .with_shared(distributed.is_some()),
        );
        self.tags.record(key, tags, entry.absolute_expiry, entry.revision);

        let dropped = {
            let mut local = self.local.lock();
            if options.local_write() {
                local.put(Arc::clone(&entry))
            } else {
                local.remove(key);
                Vec::new()
            }
        };

        let Some(store) = distributed else {
            return dropped;
        };
        match self.codec.seal(&entry, options.compression_allowed()) {
            Ok(sealed) => {
                let expiry = timestamp_to_utc(entry.absolute_expiry);
                if let Err(err) = store.set(key, sealed, expiry).await {
                    self.tier_failure("set", key, &err);
                }
            }
            Err(err) => warn!(key, error = %err, "could not seal entry for distributed tier"),
        }
        dropped
    }

    // == Release Dropped ==
    /// Accounts for entries the local tier dropped, and releases the tag
    /// memberships of those no other tier still holds.
    ///
    /// A membership is only released if the dropped entry is still the one
    /// that wrote it.
    async fn release_dropped(&self, dropped: Vec<Arc<CacheEntry>>) {
        let now = current_timestamp_ms();
        for entry in dropped {
            if entry.is_expired_at(now) {
                self.stats.record_expired(1);
            } else {
                self.stats.record_evictions(1);
            }

            let still_shared = entry.shared && entry.absolute_expiry > now;
            if entry.tags.is_empty() || still_shared {
                continue;
            }
            let _guard = self.stripes.lock(&entry.key).await;
            if self.tags.written_by(&entry.key, entry.revision) {
                debug!(key = %entry.key, "releasing tags of dropped entry");
                self.tags.forget_key(&entry.key);
            }
        }
    }

    // == Remove ==
    /// Removes keys from both tiers and the tag index.
    ///
    /// Returns a report listing keys the distributed tier did not confirm.
    pub async fn remove(&self, keys: &[String]) -> RemovalReport {
        if keys.is_empty() {
            return RemovalReport::default();
        }
        let _guards = self.stripes.lock_many_for_write(keys).await;

        for key in keys {
            if self.flights.supersede(key) {
                debug!(key = %key, "remove superseded an in-flight fetch");
            }
            self.tags.forget_key(key);
        }
        self.local.lock().remove_all(keys);

        let confirmed = self.remove_distributed(keys).await;
        RemovalReport {
            removed_keys: keys.to_vec(),
            unconfirmed_keys: if confirmed { Vec::new() } else { keys.to_vec() },
        }
    }

    async fn remove_distributed(&self, keys: &[String]) -> bool {
        let Some(store) = self.distributed.as_ref() else {
            return true;
        };
        let result = match keys {
            [key] => store.remove(key).await,
            _ => store.remove_many(keys).await,
        };
        match result {
            Ok(()) => true,
            Err(err) => {
                self.tier_failure("remove", &keys.join(","), &err);
                false
            }
        }
    }

    // == Remove By Tag ==
    /// Removes every key currently associated with `tag` from both tiers.
    pub async fn remove_by_tag(&self, tag: &str) -> Result<RemovalReport> {
        let mut keys: Vec<String> = self.tags.remove_tag(tag).into_iter().collect();
        keys.sort();
        let lifetimes: HashMap<String, u64> = keys
            .iter()
            .filter_map(|key| Some((key.clone(), self.tags.expiry_of(key)?)))
            .collect();

        if self.report_tag_metrics {
            self.stats.record_tag_invalidation(tag);
            info!(tag, keys = keys.len(), "invalidating tag");
        } else {
            debug!(keys = keys.len(), "invalidating tag");
        }

        let report = self.remove(&keys).await;
        if report.is_consistent() {
            return Ok(report);
        }

        match self.tag_consistency {
            TagConsistency::Eventual => {
                warn!(
                    tag,
                    unconfirmed = report.unconfirmed_keys.len(),
                    "tag removed locally; distributed tier did not confirm"
                );
                Ok(report)
            }
            TagConsistency::Strict => {
                // keep the tag indexed so a retry reaches the same keys
                for key in &report.unconfirmed_keys {
                    self.tags.associate(tag, key);
                    // no local entry owns the record any more
                    if let Some(expiry) = lifetimes.get(key) {
                        self.tags.track(key, *expiry, 0);
                    }
                }
                Err(CacheError::TagIndexInconsistency {
                    tag: tag.to_string(),
                    keys: report.unconfirmed_keys,
                })
            }
        }
    }

    // == Sweep Expired ==
    /// Drops expired local entries, and the tag memberships of keys whose
    /// overall lifetime has ended.
    ///
    /// A drained key is only forgotten if no write re-tracked it meanwhile,
    /// so a concurrent overwrite keeps its tags.
    pub async fn sweep_expired(&self) -> usize {
        let swept = self.local.lock().sweep_expired();
        let removed = swept.len();
        self.release_dropped(swept).await;

        let mut released = 0;
        for key in self.tags.drain_expired(current_timestamp_ms()) {
            let _guard = self.stripes.lock(&key).await;
            if !self.tags.is_tracked(&key) {
                self.tags.forget_key(&key);
                released += 1;
            }
        }
        if released > 0 {
            debug!(released, "released tags of expired keys");
        }

        removed
    }

    fn tier_failure(&self, operation: &'static str, key: &str, err: &CacheError) {
        self.stats.record_distributed_failure();
        warn!(operation, key, error = %err, "distributed tier failed; continuing with local tier only");
    }
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("distributed", &self.distributed.is_some())
            .field("codec", &self.codec)
            .field("in_flight", &self.flights.in_flight())
            .field("tag_consistency", &self.tag_consistency)
            .finish()
    }
}
