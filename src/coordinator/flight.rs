//! Single-flight table
//!
//! One [`PendingFetch`] per key with a factory running. The first caller to
//! register becomes the owner; everyone else waits on the owner's outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{CacheError, Result};

/// The shared result of a fetch: the serialized value, or the failure every
/// waiter observes.
pub type FetchOutcome = Result<Bytes>;

type PendingTable = DashMap<String, Arc<PendingFetch>>;

// == Pending Fetch ==
/// An in-flight factory invocation.
pub struct PendingFetch {
    key: String,
    outcome: watch::Sender<Option<FetchOutcome>>,
    superseded: AtomicBool,
}

impl PendingFetch {
    fn new(key: &str) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            key: key.to_string(),
            outcome,
            superseded: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once a `set` or `remove` overtook this fetch; its result must
    /// then be delivered to waiters but never stored.
    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }

    // == Wait ==
    /// Waits for the owner to resolve the fetch.
    pub async fn wait(&self) -> FetchOutcome {
        let mut rx = self.outcome.subscribe();
        let resolved = rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map(|outcome| (*outcome).clone());

        match resolved {
            Ok(Some(outcome)) => outcome,
            _ => Err(CacheError::Cancelled),
        }
    }

    fn resolve(&self, outcome: FetchOutcome) {
        self.outcome.send_replace(Some(outcome));
    }
}

impl std::fmt::Debug for PendingFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFetch")
            .field("key", &self.key)
            .field("superseded", &self.is_superseded())
            .field("resolved", &self.outcome.borrow().is_some())
            .finish()
    }
}

// == Flight ==
/// The role a caller was given when joining the table.
#[derive(Debug)]
pub enum Flight {
    /// This caller runs the factory
    Owner(FlightOwner),
    /// Another caller is already running it
    Waiter(Arc<PendingFetch>),
}

// == Flight Owner ==
/// Exclusive handle of the caller driving a fetch.
///
/// Dropping the handle without resolving it (the owner's future was dropped
/// mid-flight) resolves the fetch as cancelled, so waiters never hang.
#[derive(Debug)]
pub struct FlightOwner {
    table: Arc<PendingTable>,
    fetch: Arc<PendingFetch>,
    resolved: bool,
}

impl FlightOwner {
    pub fn fetch(&self) -> &PendingFetch {
        &self.fetch
    }

    /// Publishes the outcome to every waiter and retires the record.
    pub fn resolve(mut self, outcome: FetchOutcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: FetchOutcome) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        // retire first so a caller arriving now starts a fresh fetch
        // instead of inheriting this outcome
        self.table
            .remove_if(&self.fetch.key, |_, pending| Arc::ptr_eq(pending, &self.fetch));
        self.fetch.resolve(outcome);
    }
}

impl Drop for FlightOwner {
    fn drop(&mut self) {
        if !self.resolved {
            debug!(key = %self.fetch.key, "fetch owner dropped before resolving");
            self.finish(Err(CacheError::Cancelled));
        }
    }
}

// == Single Flight ==
/// The table of in-flight fetches, keyed by cache key.
#[derive(Debug, Default)]
pub struct SingleFlight {
    pending: Arc<PendingTable>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    // == Join ==
    /// Atomically registers a fetch for `key` or attaches to the existing one.
    pub fn join(&self, key: &str) -> Flight {
        match self.pending.entry(key.to_string()) {
            Entry::Occupied(existing) => Flight::Waiter(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                let fetch = Arc::new(PendingFetch::new(key));
                slot.insert(Arc::clone(&fetch));
                Flight::Owner(FlightOwner {
                    table: Arc::clone(&self.pending),
                    fetch,
                    resolved: false,
                })
            }
        }
    }

    // == Supersede ==
    /// Marks the in-flight fetch for `key` as overtaken and detaches it.
    ///
    /// The fetch still resolves for its waiters. Returns true if one existed.
    pub fn supersede(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, fetch)) => {
                fetch.superseded.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }
}
