//! Payload Compression
//!
//! The codec compresses through the [`Compressor`] trait so the algorithm can
//! be swapped per deployment. LZ4 is the default.

use crate::error::{CacheError, Result};

// == Compressor Trait ==
/// A block compressor used by the entry codec.
pub trait Compressor: Send + Sync {
    /// Short algorithm name for logs
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Restores a block that must decompress to exactly `expected_len` bytes.
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

// == LZ4 Compressor ==
/// LZ4 block compressor. The uncompressed size is prepended to each block.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(data, None, true)
            .map_err(|e| CacheError::Internal(format!("lz4 compression failed: {}", e)))
    }

    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        // the prefix sizes lz4's output buffer, so it is checked first
        let prefix: [u8; 4] = data
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| CacheError::Corrupt("lz4 block shorter than its size prefix".to_string()))?;
        let declared = u32::from_le_bytes(prefix) as usize;
        if declared != expected_len {
            return Err(CacheError::Corrupt(format!(
                "lz4 block declares {} bytes, expected {}",
                declared, expected_len
            )));
        }

        lz4::block::decompress(data, None)
            .map_err(|e| CacheError::Corrupt(format!("lz4 decompression failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_round_trip() {
        let compressor = Lz4Compressor;
        let data = "hybrid cache ".repeat(200);

        let compressed = compressor.compress(data.as_bytes()).unwrap();
        assert!(compressed.len() < data.len());

        let restored = compressor.decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data.as_bytes());
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let result = Lz4Compressor.decompress(&[0x10, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff], 16);
        assert!(matches!(result, Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn test_lz4_rejects_mismatched_size_prefix() {
        let compressed = Lz4Compressor.compress(&[7u8; 512]).unwrap();

        let result = Lz4Compressor.decompress(&compressed, 64);
        assert!(matches!(result, Err(CacheError::Corrupt(_))));

        // a claimed size of ~2 GiB is refused before any allocation
        let mut hostile = compressed.clone();
        hostile[..4].copy_from_slice(&0x7fff_ffffu32.to_le_bytes());
        assert!(matches!(
            Lz4Compressor.decompress(&hostile, 512),
            Err(CacheError::Corrupt(_))
        ));
    }

    #[test]
    fn test_lz4_rejects_truncated_prefix() {
        let result = Lz4Compressor.decompress(&[0x01, 0x02], 2);
        assert!(matches!(result, Err(CacheError::Corrupt(_))));
    }
}
