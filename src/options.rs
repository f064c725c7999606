//! Entry Options Module
//!
//! Per-call entry options and the merge that overlays them on the configured
//! defaults.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

bitflags! {
    /// Per-entry switches that bypass parts of the two-tier protocol.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntryFlags: u8 {
        /// Skip the local tier on lookup
        const DISABLE_LOCAL_CACHE_READ = 0b0000_0001;
        /// Do not write the entry into the local tier
        const DISABLE_LOCAL_CACHE_WRITE = 0b0000_0010;
        /// Bypass the local tier entirely
        const DISABLE_LOCAL_CACHE = Self::DISABLE_LOCAL_CACHE_READ.bits()
            | Self::DISABLE_LOCAL_CACHE_WRITE.bits();
        /// Skip the distributed tier on lookup
        const DISABLE_DISTRIBUTED_CACHE_READ = 0b0000_0100;
        /// Do not write the entry into the distributed tier
        const DISABLE_DISTRIBUTED_CACHE_WRITE = 0b0000_1000;
        /// Bypass the distributed tier entirely
        const DISABLE_DISTRIBUTED_CACHE = Self::DISABLE_DISTRIBUTED_CACHE_READ.bits()
            | Self::DISABLE_DISTRIBUTED_CACHE_WRITE.bits();
        /// Never compress this entry's payload
        const DISABLE_COMPRESSION = 0b0001_0000;
    }
}

// == Entry Options ==
/// Options supplied with a single cache call.
///
/// Every field is optional; anything left unset is inherited from
/// [`crate::CacheConfig::default_entry_options`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    /// Overall lifetime of the entry in both tiers
    pub expiration: Option<Duration>,
    /// Lifetime of the entry in the local tier
    pub local_cache_expiration: Option<Duration>,
    /// Protocol switches
    pub flags: Option<EntryFlags>,
}

impl EntryOptions {
    /// Creates empty options that inherit every default.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_local_expiration(mut self, expiration: Duration) -> Self {
        self.local_cache_expiration = Some(expiration);
        self
    }

    pub fn with_flags(mut self, flags: EntryFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    // == Resolve ==
    /// Overlays these options on `defaults`.
    ///
    /// A field present here overrides the default; an absent field inherits it.
    /// The local expiration falls back to the overall expiration when neither
    /// side sets it, and is never allowed to outlive the overall expiration.
    pub fn resolve(&self, defaults: &EntryOptions) -> Result<ResolvedOptions> {
        let expiration = self
            .expiration
            .or(defaults.expiration)
            .ok_or_else(|| CacheError::InvalidOptions("no expiration configured".to_string()))?;

        let local_expiration = self
            .local_cache_expiration
            .or(defaults.local_cache_expiration)
            .unwrap_or(expiration)
            .min(expiration);

        let flags = self.flags.or(defaults.flags).unwrap_or_else(EntryFlags::empty);

        Ok(ResolvedOptions {
            expiration,
            local_expiration,
            flags,
        })
    }
}

// == Resolved Options ==
/// Fully merged options for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub expiration: Duration,
    pub local_expiration: Duration,
    pub flags: EntryFlags,
}

impl ResolvedOptions {
    pub fn local_read(&self) -> bool {
        !self.flags.contains(EntryFlags::DISABLE_LOCAL_CACHE_READ)
    }

    /// A zero local lifetime means the entry is never written locally.
    pub fn local_write(&self) -> bool {
        !self.flags.contains(EntryFlags::DISABLE_LOCAL_CACHE_WRITE) && !self.local_expiration.is_zero()
    }

    pub fn distributed_read(&self) -> bool {
        !self.flags.contains(EntryFlags::DISABLE_DISTRIBUTED_CACHE_READ)
    }

    pub fn distributed_write(&self) -> bool {
        !self.flags.contains(EntryFlags::DISABLE_DISTRIBUTED_CACHE_WRITE) && !self.expiration.is_zero()
    }

    pub fn compression_allowed(&self) -> bool {
        !self.flags.contains(EntryFlags::DISABLE_COMPRESSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> EntryOptions {
        EntryOptions::new()
            .with_expiration(Duration::from_secs(300))
            .with_local_expiration(Duration::from_secs(300))
    }

    #[test]
    fn test_resolve_inherits_defaults() {
        let resolved = EntryOptions::new().resolve(&defaults()).unwrap();

        assert_eq!(resolved.expiration, Duration::from_secs(300));
        assert_eq!(resolved.local_expiration, Duration::from_secs(300));
        assert!(resolved.flags.is_empty());
    }

    #[test]
    fn test_resolve_overrides_present_fields() {
        let options = EntryOptions::new()
            .with_expiration(Duration::from_secs(120))
            .with_local_expiration(Duration::from_secs(60));
        let resolved = options.resolve(&defaults()).unwrap();

        assert_eq!(resolved.expiration, Duration::from_secs(120));
        assert_eq!(resolved.local_expiration, Duration::from_secs(60));
    }

    #[test]
    fn test_local_expiration_clamped_to_overall() {
        let options = EntryOptions::new()
            .with_expiration(Duration::from_secs(10))
            .with_local_expiration(Duration::from_secs(60));
        let resolved = options.resolve(&defaults()).unwrap();

        assert_eq!(resolved.local_expiration, Duration::from_secs(10));
    }

    #[test]
    fn test_inherited_local_expiration_clamped_to_call_expiration() {
        let options = EntryOptions::new().with_expiration(Duration::from_secs(30));
        let resolved = options.resolve(&defaults()).unwrap();

        assert_eq!(resolved.local_expiration, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_expiration_rejected() {
        let result = EntryOptions::new().resolve(&EntryOptions::new());
        assert!(matches!(result, Err(CacheError::InvalidOptions(_))));
    }

    #[test]
    fn test_composite_flags() {
        let resolved = EntryOptions::new()
            .with_flags(EntryFlags::DISABLE_DISTRIBUTED_CACHE)
            .resolve(&defaults())
            .unwrap();

        assert!(!resolved.distributed_read());
        assert!(!resolved.distributed_write());
        assert!(resolved.local_read());
        assert!(resolved.local_write());
    }

    #[test]
    fn test_zero_expiration_disables_writes() {
        let resolved = EntryOptions::new()
            .with_expiration(Duration::ZERO)
            .resolve(&defaults())
            .unwrap();

        assert!(!resolved.local_write());
        assert!(!resolved.distributed_write());
    }
}
