//! Hybrid Cache demo
//!
//! Exercises every public operation against a cache backed by the in-memory
//! distributed store, with tracing enabled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hybrid_cache::{
    spawn_sweep_task, CacheConfig, CancellationToken, EntryFlags, EntryOptions, HybridCache,
    InMemoryDistributedStore,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SomeObj {
    key: String,
}

async fn load(key: String) -> anyhow::Result<SomeObj> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(SomeObj { key })
}

/// Main entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the cache over an in-memory distributed store
/// 4. Start the background expiry sweep
/// 5. Replay get-or-create, set and the removal forms
/// 6. Log statistics and stop the sweep
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "hybrid_cache=info", can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hybrid_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    let sweep_interval = config.sweep_interval;
    let store = Arc::new(InMemoryDistributedStore::new());
    let cache = HybridCache::with_distributed(config, store.clone())
        .context("failed to build cache")?;

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweep_task(cache.clone(), sweep_interval, shutdown.clone());
    let token = CancellationToken::new();

    // concurrent callers share one load
    let callers = (0..5).map(|_| {
        let cache = cache.clone();
        let token = token.clone();
        tokio::spawn(async move {
            cache
                .get_or_create(
                    "some-key",
                    |key, _| load(key),
                    None,
                    &["tag1", "tag2"],
                    &token,
                )
                .await
        })
    });
    for caller in callers {
        let obj: SomeObj = caller.await??;
        info!(key = %obj.key, "get_or_create returned");
    }

    let with_state: SomeObj = cache
        .get_or_create_with_state(
            "some-key-2",
            "prefix",
            |prefix, key, _| async move { load(format!("{prefix}:{key}")).await },
            None,
            &["tag1"],
            &token,
        )
        .await?;
    info!(key = %with_state.key, "get_or_create_with_state returned");

    let local_only = EntryOptions::new()
        .with_expiration(Duration::from_secs(30))
        .with_flags(EntryFlags::DISABLE_DISTRIBUTED_CACHE);
    cache
        .set(
            "some-key-3",
            &SomeObj { key: "some-key-3".to_string() },
            Some(&local_only),
            &["tag3"],
            &token,
        )
        .await?;
    info!(distributed_writes = store.write_count(), "set completed");

    cache.remove("some-key", &token).await?;
    cache.remove_many(&["some-key-2", "missing"], &token).await?;

    cache
        .set("some-key-4", &SomeObj { key: "some-key-4".to_string() }, None, &["tag4"], &token)
        .await?;
    let by_tag = cache.remove_by_tag("tag4", &token).await?;
    info!(removed = ?by_tag.removed_keys, "remove_by_tag completed");

    let by_tags = cache.remove_by_tags(&["tag1", "tag3"], &token).await?;
    info!(removed = ?by_tags.removed_keys, "remove_by_tags completed");

    let stats = cache.stats();
    let snapshot = serde_json::to_string(&stats)?;
    info!(hit_rate = stats.hit_rate(), stats = %snapshot, "cache statistics");

    shutdown.cancel();
    sweeper.await?;
    info!("demo complete");
    Ok(())
}
