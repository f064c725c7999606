//! Expiry Sweep Task
//!
//! Background task that periodically drops expired local entries, on top of
//! the lazy expiry applied by every lookup.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::facade::HybridCache;

/// Spawns a background task that sweeps expired entries out of the local tier.
///
/// The task runs until `shutdown` is cancelled; it never holds a cache lock
/// between sweeps.
///
/// # Arguments
/// * `cache` - Handle to the cache to sweep
/// * `interval` - Time between sweeps
/// * `shutdown` - Stops the task when cancelled
///
/// # Returns
/// A JoinHandle that completes once the task has observed the shutdown.
///
/// # Example
/// ```ignore
/// let shutdown = CancellationToken::new();
/// let sweeper = spawn_sweep_task(cache.clone(), Duration::from_secs(1), shutdown.clone());
/// // Later, during shutdown:
/// shutdown.cancel();
/// sweeper.await?;
/// ```
pub fn spawn_sweep_task(
    cache: HybridCache,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "starting expiry sweep task");

        // a zero period would make `interval` panic
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let removed = cache.sweep_expired().await;
            if removed > 0 {
                info!(removed, "expiry sweep removed expired entries");
            } else {
                debug!("expiry sweep found no expired entries");
            }
        }

        info!("expiry sweep task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::options::EntryOptions;

    fn cache() -> HybridCache {
        HybridCache::new(CacheConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_sweep_task_removes_expired_entries() {
        let cache = cache();
        let token = CancellationToken::new();
        let options = EntryOptions::new().with_expiration(Duration::from_millis(100));

        cache
            .set("expire_soon", &"value", Some(&options), &["t"], &token)
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_sweep_task(cache.clone(), Duration::from_millis(50), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(400)).await;

        let stats = cache.stats();
        assert_eq!(stats.local_entries, 0, "expired entry should have been swept");
        assert_eq!(stats.expired, 1);
        assert!(!cache.tags().contains_tag("t"), "tag membership released with the entry");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_task_preserves_valid_entries() {
        let cache = cache();
        let token = CancellationToken::new();

        cache.set("long_lived", &"value", None, &[], &token).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_sweep_task(cache.clone(), Duration::from_millis(50), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(cache.contains_local("long_lived"), "valid entry should not be removed");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_task_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        let handle = spawn_sweep_task(cache(), Duration::from_secs(60), shutdown.clone());

        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop promptly")
            .unwrap();
    }
}
