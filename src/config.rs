//! Configuration Module
//!
//! Handles loading, validating and defaulting the engine's global configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::options::EntryOptions;

/// How a tag removal reports a distributed-tier failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagConsistency {
    /// Complete the removal locally and log a warning
    #[default]
    Eventual,
    /// Fail the call and keep the tag indexed so a retry can find the keys
    Strict,
}

impl FromStr for TagConsistency {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eventual" => Ok(TagConsistency::Eventual),
            "strict" => Ok(TagConsistency::Strict),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown tag consistency mode '{}'",
                other
            ))),
        }
    }
}

/// Global cache configuration, fixed for the lifetime of a cache instance.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Largest serialized value accepted, measured before compression
    pub maximum_payload_bytes: usize,
    /// Longest key (and tag) accepted, in bytes
    pub maximum_key_length: usize,
    /// Attach tag names to log events and keep per-tag counters
    pub report_tag_metrics: bool,
    /// Never compress payloads written to the distributed tier
    pub disable_compression: bool,
    /// Options inherited by every call that leaves a field unset
    pub default_entry_options: EntryOptions,
    /// Maximum number of entries held by the local tier
    pub local_capacity: usize,
    /// Interval between background expiry sweeps
    pub sweep_interval: Duration,
    /// Payloads smaller than this are stored uncompressed
    pub compression_threshold: usize,
    /// Behaviour of tag removal when the distributed tier fails
    pub tag_consistency: TagConsistency,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `HYBRID_CACHE_MAX_PAYLOAD_BYTES` (default: 1048576)
    /// - `HYBRID_CACHE_MAX_KEY_LENGTH` (default: 1024)
    /// - `HYBRID_CACHE_REPORT_TAG_METRICS` (default: false)
    /// - `HYBRID_CACHE_DISABLE_COMPRESSION` (default: false)
    /// - `HYBRID_CACHE_EXPIRATION_SECS` (default: 300)
    /// - `HYBRID_CACHE_LOCAL_EXPIRATION_SECS` (default: 300)
    /// - `HYBRID_CACHE_LOCAL_CAPACITY` (default: 10000)
    /// - `HYBRID_CACHE_SWEEP_INTERVAL_SECS` (default: 1)
    /// - `HYBRID_CACHE_COMPRESSION_THRESHOLD` (default: 1024)
    /// - `HYBRID_CACHE_TAG_CONSISTENCY` - `eventual` or `strict` (default: eventual)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let expiration = env_parse::<u64>("HYBRID_CACHE_EXPIRATION_SECS")
            .map(Duration::from_secs)
            .or(defaults.default_entry_options.expiration);
        let local_expiration = env_parse::<u64>("HYBRID_CACHE_LOCAL_EXPIRATION_SECS")
            .map(Duration::from_secs)
            .or(defaults.default_entry_options.local_cache_expiration);

        Self {
            maximum_payload_bytes: env_parse("HYBRID_CACHE_MAX_PAYLOAD_BYTES")
                .unwrap_or(defaults.maximum_payload_bytes),
            maximum_key_length: env_parse("HYBRID_CACHE_MAX_KEY_LENGTH")
                .unwrap_or(defaults.maximum_key_length),
            report_tag_metrics: env_parse("HYBRID_CACHE_REPORT_TAG_METRICS")
                .unwrap_or(defaults.report_tag_metrics),
            disable_compression: env_parse("HYBRID_CACHE_DISABLE_COMPRESSION")
                .unwrap_or(defaults.disable_compression),
            default_entry_options: EntryOptions {
                expiration,
                local_cache_expiration: local_expiration,
                flags: defaults.default_entry_options.flags,
            },
            local_capacity: env_parse("HYBRID_CACHE_LOCAL_CAPACITY")
                .unwrap_or(defaults.local_capacity),
            sweep_interval: env_parse::<u64>("HYBRID_CACHE_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            compression_threshold: env_parse("HYBRID_CACHE_COMPRESSION_THRESHOLD")
                .unwrap_or(defaults.compression_threshold),
            tag_consistency: env_parse("HYBRID_CACHE_TAG_CONSISTENCY")
                .unwrap_or(defaults.tag_consistency),
        }
    }

    // == Validate ==
    /// Checks the global ceilings and defaults once, at cache construction.
    pub fn validate(&self) -> Result<()> {
        if self.maximum_payload_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "maximum_payload_bytes must be positive".to_string(),
            ));
        }
        // envelope bodies carry a u32 length
        if u32::try_from(self.maximum_payload_bytes).is_err() {
            return Err(CacheError::InvalidConfig(format!(
                "maximum_payload_bytes must not exceed {}",
                u32::MAX
            )));
        }
        if self.maximum_key_length == 0 {
            return Err(CacheError::InvalidConfig(
                "maximum_key_length must be positive".to_string(),
            ));
        }
        if self.local_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "local_capacity must be positive".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep_interval must be positive".to_string(),
            ));
        }
        if self.default_entry_options.expiration.is_none() {
            return Err(CacheError::InvalidConfig(
                "default_entry_options.expiration must be set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            maximum_payload_bytes: 1024 * 1024,
            maximum_key_length: 1024,
            report_tag_metrics: false,
            disable_compression: false,
            default_entry_options: EntryOptions {
                expiration: Some(Duration::from_secs(300)),
                local_cache_expiration: Some(Duration::from_secs(300)),
                flags: None,
            },
            local_capacity: 10_000,
            sweep_interval: Duration::from_secs(1),
            compression_threshold: 1024,
            tag_consistency: TagConsistency::Eventual,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
