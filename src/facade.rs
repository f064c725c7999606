//! Cache Facade Module
//!
//! Public entry point. Validates keys, tags and options against the global
//! configuration before anything is touched, then delegates to the
//! coordinator.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::CacheStats;
use crate::codec::EntryCodec;
use crate::config::CacheConfig;
use crate::coordinator::{FetchCoordinator, RemovalReport};
use crate::distributed::DistributedStore;
use crate::error::{CacheError, Result};
use crate::options::{EntryOptions, ResolvedOptions};
use crate::tags::TagIndex;

// == Hybrid Cache ==
/// A two-tier cache shared by every caller holding a clone.
///
/// # Example
/// ```ignore
/// let cache = HybridCache::with_distributed(CacheConfig::default(), store)?;
/// let user: User = cache
///     .get_or_create("user:1", |key, _| async move { load_user(&key).await }, None, &["users"], &token)
///     .await?;
/// ```
#[derive(Clone)]
pub struct HybridCache {
    inner: Arc<FetchCoordinator>,
    config: Arc<CacheConfig>,
}

impl HybridCache {
    // == Constructors ==
    /// Creates a local-only cache.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let codec = EntryCodec::new(&config);
        Self::from_parts(config, None, codec)
    }

    /// Creates a cache backed by a distributed tier.
    pub fn with_distributed(config: CacheConfig, store: Arc<dyn DistributedStore>) -> Result<Self> {
        let codec = EntryCodec::new(&config);
        Self::from_parts(config, Some(store), codec)
    }

    /// Creates a cache from explicit parts, e.g. a codec with a custom
    /// compressor.
    ///
    /// # Returns
    /// `InvalidConfig` if the configuration fails validation.
    pub fn from_parts(
        config: CacheConfig,
        store: Option<Arc<dyn DistributedStore>>,
        codec: EntryCodec,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            distributed = store.is_some(),
            local_capacity = config.local_capacity,
            max_payload_bytes = config.maximum_payload_bytes,
            tag_consistency = ?config.tag_consistency,
            "hybrid cache initialized"
        );

        Ok(Self {
            inner: Arc::new(FetchCoordinator::new(&config, store, codec)),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // == Get Or Create ==
    /// Returns the value cached under `key`, invoking `factory` on a miss.
    ///
    /// Concurrent callers for the same key share a single factory invocation
    /// and observe the same value or failure.
    ///
    /// # Arguments
    /// * `factory` - Called with the key and a token that fires if the caller
    ///   driving the fetch is cancelled
    /// * `options` - Per-call overrides of the default entry options
    /// * `tags` - Tags attached to a newly created entry
    /// * `cancel` - Cancels this caller's wait
    pub async fn get_or_create<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: Option<&EntryOptions>,
        tags: &[&str],
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(String, CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.validate_key(key)?;
        let resolved = self.resolve(options)?;
        let tags = self.validate_tags(tags)?;
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let owned_key = key.to_string();
        self.inner
            .get_or_create(key, move |token| factory(owned_key, token), resolved, tags, cancel)
            .await
    }

    /// Like [`HybridCache::get_or_create`], but the factory receives `state`
    /// explicitly instead of capturing it.
    pub async fn get_or_create_with_state<T, S, F, Fut>(
        &self,
        key: &str,
        state: S,
        factory: F,
        options: Option<&EntryOptions>,
        tags: &[&str],
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(S, String, CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.get_or_create(key, move |key, token| factory(state, key, token), options, tags, cancel)
            .await
    }

    // == Set ==
    /// Writes `value` through both tiers, replacing the key's tags.
    ///
    /// A fetch in flight for `key` still answers its waiters, but its result
    /// is never stored over this value.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: Option<&EntryOptions>,
        tags: &[&str],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.validate_key(key)?;
        let resolved = self.resolve(options)?;
        let tags = self.validate_tags(tags)?;
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        self.inner.set(key, value, resolved, tags).await
    }

    // == Remove ==
    /// Removes `key` from both tiers and the tag index.
    pub async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<RemovalReport> {
        self.remove_many(&[key], cancel).await
    }

    /// Removes several keys at once.
    pub async fn remove_many(&self, keys: &[&str], cancel: &CancellationToken) -> Result<RemovalReport> {
        for key in keys {
            self.validate_key(key)?;
        }
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let keys: Vec<String> = keys
            .iter()
            .map(|key| key.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok(self.inner.remove(&keys).await)
    }

    // == Remove By Tag ==
    /// Removes every entry currently tagged `tag`, in both tiers.
    ///
    /// # Returns
    /// In eventual mode, a report that may list keys the distributed tier did
    /// not confirm. In strict mode such keys produce `TagIndexInconsistency`.
    pub async fn remove_by_tag(&self, tag: &str, cancel: &CancellationToken) -> Result<RemovalReport> {
        self.remove_by_tags(&[tag], cancel).await
    }

    /// Removes every entry carrying any of `tags`.
    ///
    /// Tags are processed in order; in strict mode the first inconsistency
    /// stops the run.
    pub async fn remove_by_tags(&self, tags: &[&str], cancel: &CancellationToken) -> Result<RemovalReport> {
        let tags = self.validate_tags(tags)?;

        let mut report = RemovalReport::default();
        for tag in &tags {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            report.merge(self.inner.remove_by_tag(tag).await?);
        }
        Ok(report)
    }

    // == Maintenance ==
    /// Drops expired local entries. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired().await
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    pub fn tags(&self) -> &TagIndex {
        self.inner.tags()
    }

    /// Number of fetches currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.flights().in_flight()
    }

    /// True if `key` is held by the local tier right now.
    pub fn contains_local(&self, key: &str) -> bool {
        self.inner.peek_local(key).is_some()
    }

    // == Validation ==
    fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey("key must not be empty".to_string()));
        }
        if key.len() > self.config.maximum_key_length {
            return Err(CacheError::InvalidKey(format!(
                "key length {} exceeds maximum of {}",
                key.len(),
                self.config.maximum_key_length
            )));
        }
        Ok(())
    }

    fn validate_tags(&self, tags: &[&str]) -> Result<BTreeSet<String>> {
        let limit = self.config.maximum_key_length.min(u16::MAX as usize);
        tags.iter()
            .map(|tag| {
                if tag.is_empty() {
                    Err(CacheError::InvalidOptions("tag must not be empty".to_string()))
                } else if tag.len() > limit {
                    Err(CacheError::InvalidOptions(format!(
                        "tag length {} exceeds maximum of {}",
                        tag.len(),
                        limit
                    )))
                } else {
                    Ok(tag.to_string())
                }
            })
            .collect()
    }

    fn resolve(&self, options: Option<&EntryOptions>) -> Result<ResolvedOptions> {
        let defaults = &self.config.default_entry_options;
        options.unwrap_or(defaults).resolve(defaults)
    }
}

impl std::fmt::Debug for HybridCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCache")
            .field("inner", &self.inner)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache() -> HybridCache {
        HybridCache::new(CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = CacheConfig {
            maximum_key_length: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(HybridCache::new(config), Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_rejects_empty_and_long_keys() {
        let cache = HybridCache::new(CacheConfig {
            maximum_key_length: 8,
            ..CacheConfig::default()
        })
        .unwrap();
        let token = CancellationToken::new();

        let empty = cache.set("", &1u32, None, &[], &token).await.unwrap_err();
        let long = cache.set("much-too-long", &1u32, None, &[], &token).await.unwrap_err();

        assert!(matches!(empty, CacheError::InvalidKey(_)));
        assert!(matches!(long, CacheError::InvalidKey(_)));
        assert!(!cache.contains_local("much-too-long"));
    }

    #[tokio::test]
    async fn test_rejects_empty_tag_before_mutation() {
        let cache = cache();
        let token = CancellationToken::new();

        let err = cache.set("k", &1u32, None, &["ok", ""], &token).await.unwrap_err();

        assert!(err.is_validation());
        assert!(!cache.contains_local("k"));
    }

    #[tokio::test]
    async fn test_rejects_oversized_value() {
        let cache = HybridCache::new(CacheConfig {
            maximum_payload_bytes: 16,
            ..CacheConfig::default()
        })
        .unwrap();
        let token = CancellationToken::new();

        let err = cache
            .set("k", &"x".repeat(64), None, &[], &token)
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::PayloadTooLarge { limit: 16, .. }));
        assert!(!cache.contains_local("k"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cache = cache();
        let token = CancellationToken::new();
        token.cancel();

        let err = cache
            .get_or_create("k", |_, _| async { Ok(1u32) }, None, &[], &token)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(cache.stats().factory_calls, 0);
    }

    #[tokio::test]
    async fn test_with_state_passes_state() {
        let cache = cache();
        let token = CancellationToken::new();

        let value: String = cache
            .get_or_create_with_state(
                "greeting",
                "hello",
                |state, key, _| async move { Ok(format!("{state} {key}")) },
                None,
                &[],
                &token,
            )
            .await
            .unwrap();

        assert_eq!(value, "hello greeting");
    }

    #[tokio::test]
    async fn test_per_call_expiration_overrides_default() {
        let cache = cache();
        let token = CancellationToken::new();
        let options = EntryOptions::new().with_expiration(Duration::from_millis(100));

        cache.set("short", &1u32, Some(&options), &[], &token).await.unwrap();
        assert!(cache.contains_local("short"));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!cache.contains_local("short"));
    }

    #[tokio::test]
    async fn test_remove_many_deduplicates_keys() {
        let cache = cache();
        let token = CancellationToken::new();
        cache.set("a", &1u32, None, &[], &token).await.unwrap();

        let report = cache.remove_many(&["a", "a", "b"], &token).await.unwrap();

        assert_eq!(report.removed_keys, vec!["a".to_string(), "b".to_string()]);
        assert!(report.is_consistent());
    }
}
