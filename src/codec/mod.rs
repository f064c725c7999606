//! Entry Codec Module
//!
//! Converts values to payload bytes and seals entries into the self-describing
//! envelope stored by the distributed tier.
//!
//! # Envelope layout
//!
//! ```text
//! version:u8 | flags:u8 | created_at:u64 | absolute_expiry:u64
//! tag_count:u16 | (tag_len:u16 | tag bytes)*
//! body_len:u32 | body (lz4 block when COMPRESSED is set)
//! ```
//!
//! All integers are big-endian. `body_len` is the uncompressed length.

mod compression;

pub use compression::{Compressor, Lz4Compressor};

use std::collections::BTreeSet;
use std::sync::Arc;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::cache::CacheEntry;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

const ENVELOPE_VERSION: u8 = 1;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct EnvelopeFlags: u8 {
        const COMPRESSED = 0b0000_0001;
    }
}

// == Envelope ==
/// An entry as read back from the distributed tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub created_at: u64,
    pub absolute_expiry: u64,
    pub tags: BTreeSet<String>,
    /// Serialized value, already decompressed
    pub body: Bytes,
}

impl Envelope {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.absolute_expiry
    }
}

// == Entry Codec ==
/// Serializes values as JSON and seals them with optional compression.
///
/// The payload limit applies to the serialized value before compression.
#[derive(Clone)]
pub struct EntryCodec {
    max_payload_bytes: usize,
    compression_enabled: bool,
    compression_threshold: usize,
    compressor: Arc<dyn Compressor>,
}

impl EntryCodec {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            max_payload_bytes: config.maximum_payload_bytes,
            compression_enabled: !config.disable_compression,
            compression_threshold: config.compression_threshold,
            compressor: Arc::new(Lz4Compressor),
        }
    }

    /// Replaces the default LZ4 compressor.
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    // == Serialize ==
    /// Serializes `value`, failing with `PayloadTooLarge` above the limit.
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        let payload = serde_json::to_vec(value)?;
        if payload.len() > self.max_payload_bytes {
            return Err(CacheError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_bytes,
            });
        }
        Ok(Bytes::from(payload))
    }

    /// Decodes a stored payload. A payload that does not parse as `T` is
    /// reported as `Corrupt`.
    pub fn deserialize<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T> {
        serde_json::from_slice(payload)
            .map_err(|e| CacheError::Corrupt(format!("payload does not decode: {}", e)))
    }

    // == Seal ==
    /// Encodes an entry into envelope bytes.
    ///
    /// The body is compressed only when compression is enabled for both the
    /// deployment and the call, the body reaches the threshold, and the
    /// compressed form is actually smaller.
    pub fn seal(&self, entry: &CacheEntry, allow_compression: bool) -> Result<Bytes> {
        let body = &entry.payload;
        if body.len() > self.max_payload_bytes {
            return Err(CacheError::PayloadTooLarge {
                size: body.len(),
                limit: self.max_payload_bytes,
            });
        }

        let mut flags = EnvelopeFlags::empty();
        let mut stored: Bytes = body.clone();
        if self.compression_enabled && allow_compression && body.len() >= self.compression_threshold {
            let compressed = self.compressor.compress(body)?;
            if compressed.len() < body.len() {
                debug!(
                    algorithm = self.compressor.name(),
                    before = body.len(),
                    after = compressed.len(),
                    "compressed payload"
                );
                flags |= EnvelopeFlags::COMPRESSED;
                stored = Bytes::from(compressed);
            }
        }

        let tags_len: usize = entry.tags.iter().map(|t| 2 + t.len()).sum();
        let mut buf = BytesMut::with_capacity(24 + tags_len + stored.len());
        buf.put_u8(ENVELOPE_VERSION);
        buf.put_u8(flags.bits());
        buf.put_u64(entry.created_at);
        buf.put_u64(entry.absolute_expiry);

        let tag_count = u16::try_from(entry.tags.len())
            .map_err(|_| CacheError::InvalidOptions("too many tags".to_string()))?;
        buf.put_u16(tag_count);
        for tag in &entry.tags {
            let len = u16::try_from(tag.len())
                .map_err(|_| CacheError::InvalidOptions(format!("tag too long: {} bytes", tag.len())))?;
            buf.put_u16(len);
            buf.put_slice(tag.as_bytes());
        }

        let body_len = u32::try_from(body.len()).map_err(|_| CacheError::PayloadTooLarge {
            size: body.len(),
            limit: u32::MAX as usize,
        })?;
        buf.put_u32(body_len);
        buf.put_slice(&stored);
        Ok(buf.freeze())
    }

    // == Open ==
    /// Decodes envelope bytes, failing with `Corrupt` on any malformation.
    pub fn open(&self, bytes: &[u8]) -> Result<Envelope> {
        let mut buf = bytes;

        let version = read_u8(&mut buf)?;
        if version != ENVELOPE_VERSION {
            return Err(CacheError::Corrupt(format!(
                "unsupported envelope version {}",
                version
            )));
        }
        let flags = EnvelopeFlags::from_bits(read_u8(&mut buf)?)
            .ok_or_else(|| CacheError::Corrupt("unknown envelope flags".to_string()))?;
        let created_at = read_u64(&mut buf)?;
        let absolute_expiry = read_u64(&mut buf)?;

        let tag_count = read_u16(&mut buf)?;
        let mut tags = BTreeSet::new();
        for _ in 0..tag_count {
            let len = read_u16(&mut buf)? as usize;
            let raw = read_slice(&mut buf, len)?;
            let tag = std::str::from_utf8(raw)
                .map_err(|_| CacheError::Corrupt("tag is not valid UTF-8".to_string()))?;
            tags.insert(tag.to_string());
        }

        let body_len = read_u32(&mut buf)? as usize;
        if body_len > self.max_payload_bytes {
            return Err(CacheError::Corrupt(format!(
                "declared body of {} bytes exceeds limit of {} bytes",
                body_len, self.max_payload_bytes
            )));
        }

        let body = if flags.contains(EnvelopeFlags::COMPRESSED) {
            let restored = self.compressor.decompress(buf, body_len)?;
            if restored.len() != body_len {
                return Err(CacheError::Corrupt(format!(
                    "decompressed {} bytes, expected {}",
                    restored.len(),
                    body_len
                )));
            }
            Bytes::from(restored)
        } else {
            if buf.len() != body_len {
                return Err(CacheError::Corrupt(format!(
                    "body is {} bytes, expected {}",
                    buf.len(),
                    body_len
                )));
            }
            Bytes::copy_from_slice(buf)
        };

        Ok(Envelope {
            created_at,
            absolute_expiry,
            tags,
            body,
        })
    }
}

impl std::fmt::Debug for EntryCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryCodec")
            .field("max_payload_bytes", &self.max_payload_bytes)
            .field("compression_enabled", &self.compression_enabled)
            .field("compression_threshold", &self.compression_threshold)
            .field("compressor", &self.compressor.name())
            .finish()
    }
}

fn ensure(buf: &[u8], needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(CacheError::Corrupt(format!(
            "truncated envelope: needed {} more bytes, found {}",
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut &[u8]) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn read_u64(buf: &mut &[u8]) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

fn read_slice<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    ensure(buf, len)?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn codec(disable_compression: bool) -> EntryCodec {
        let config = CacheConfig {
            maximum_payload_bytes: 4096,
            disable_compression,
            compression_threshold: 64,
            ..CacheConfig::default()
        };
        EntryCodec::new(&config)
    }

    fn entry(codec: &EntryCodec, value: &str, tags: &[&str]) -> CacheEntry {
        CacheEntry::new(
            "key",
            codec.serialize(&value).unwrap(),
            tags.iter().map(|t| t.to_string()).collect(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_seal_and_open() {
        let codec = codec(false);
        let entry = entry(&codec, "hello", &["a", "b"]);

        let sealed = codec.seal(&entry, true).unwrap();
        let envelope = codec.open(&sealed).unwrap();

        assert_eq!(envelope.created_at, entry.created_at);
        assert_eq!(envelope.absolute_expiry, entry.absolute_expiry);
        assert_eq!(envelope.tags, entry.tags);
        assert_eq!(codec.deserialize::<String>(&envelope.body).unwrap(), "hello");
    }

    #[test]
    fn test_compressible_payload_is_flagged() {
        let codec = codec(false);
        let entry = entry(&codec, &"abc".repeat(500), &[]);

        let sealed = codec.seal(&entry, true).unwrap();
        assert_eq!(sealed[1], EnvelopeFlags::COMPRESSED.bits());
        assert!(sealed.len() < entry.payload.len());

        let envelope = codec.open(&sealed).unwrap();
        assert_eq!(envelope.body, entry.payload);
    }

    #[test]
    fn test_compression_toggle_does_not_affect_decode() {
        let writer = codec(false);
        let reader = codec(true);
        let entry = entry(&writer, &"xyz".repeat(500), &[]);

        let sealed = writer.seal(&entry, true).unwrap();
        assert_eq!(reader.open(&sealed).unwrap().body, entry.payload);
    }

    #[test]
    fn test_compression_disabled_per_call() {
        let codec = codec(false);
        let entry = entry(&codec, &"abc".repeat(500), &[]);

        let sealed = codec.seal(&entry, false).unwrap();
        assert_eq!(sealed[1], 0);
    }

    #[test]
    fn test_small_payload_not_compressed() {
        let codec = codec(false);
        let entry = entry(&codec, "tiny", &[]);

        let sealed = codec.seal(&entry, true).unwrap();
        assert_eq!(sealed[1], 0);
    }

    #[test]
    fn test_serialize_too_large() {
        let codec = codec(false);
        let result = codec.serialize(&"x".repeat(5000));
        assert!(matches!(
            result,
            Err(CacheError::PayloadTooLarge { limit: 4096, .. })
        ));
    }

    #[test]
    fn test_limit_applies_before_compression() {
        let codec = codec(false);
        // compresses to far below the limit, but the serialized size is over it
        let result = codec.serialize(&"a".repeat(4096));
        assert!(matches!(result, Err(CacheError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_open_truncated() {
        let codec = codec(false);
        let entry = entry(&codec, "hello", &["tag"]);
        let sealed = codec.seal(&entry, true).unwrap();

        for cut in [0, 1, 10, 19, sealed.len() - 1] {
            let result = codec.open(&sealed[..cut]);
            assert!(matches!(result, Err(CacheError::Corrupt(_))), "cut at {}", cut);
        }
    }

    #[test]
    fn test_open_unknown_version() {
        let codec = codec(false);
        let entry = entry(&codec, "hello", &[]);
        let mut sealed = codec.seal(&entry, true).unwrap().to_vec();
        sealed[0] = 9;

        assert!(matches!(codec.open(&sealed), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn test_deserialize_wrong_type() {
        let codec = codec(false);
        let payload = codec.serialize(&"text").unwrap();
        let result = codec.deserialize::<u64>(&payload);
        assert!(matches!(result, Err(CacheError::Corrupt(_))));

        let result = codec.deserialize::<String>(b"{not json");
        assert!(matches!(result, Err(CacheError::Corrupt(_))));
    }
}
