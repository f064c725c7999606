//! Hybrid Cache - A two-tier cache engine
//!
//! Combines a fast in-process tier with an optional shared distributed tier,
//! with single-flight stampede protection, tag-based bulk invalidation and
//! compressed self-describing payloads.

pub mod cache;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod distributed;
pub mod error;
pub mod facade;
pub mod options;
pub mod tags;
pub mod tasks;

pub use cache::CacheStats;
pub use config::{CacheConfig, TagConsistency};
pub use coordinator::RemovalReport;
pub use distributed::{DistributedStore, InMemoryDistributedStore};
pub use error::{CacheError, Result};
pub use facade::HybridCache;
pub use options::{EntryFlags, EntryOptions};
pub use tasks::spawn_sweep_task;
pub use tokio_util::sync::CancellationToken;
