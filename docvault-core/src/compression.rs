/*!
Streaming compression for snapshot blobs.

An adapter wraps a reader in an encoder or decoder. The codec pipes the
serialized snapshot through it straight into the backup store, so the
compressed blob is never held in memory as a whole.
*/

use crate::{Result, VaultError};
use flate2::{read::GzDecoder, read::GzEncoder, Compression};
use std::io::Read;

/// First two bytes of every gzip member
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A reversible byte transform applied between the codec and the store
pub trait CompressionAdapter: Send + Sync {
    /// Reading from the result yields `input` compressed
    fn encoder<'a>(&self, input: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a>;

    /// Reading from the result yields `input` decompressed
    fn decoder<'a>(&self, input: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a>;

    fn algorithm_name(&self) -> &str;

    /// One-shot compression of a buffer
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encoder(Box::new(data))
            .read_to_end(&mut out)
            .map_err(|e| VaultError::compression(format!("{} encode failed: {e}", self.algorithm_name())))?;
        Ok(out)
    }

    /// One-shot decompression of a buffer
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.decoder(Box::new(data))
            .read_to_end(&mut out)
            .map_err(|e| VaultError::compression(format!("{} decode failed: {e}", self.algorithm_name())))?;
        Ok(out)
    }
}

/// Gzip (DEFLATE) adapter
///
/// ```rust
/// use docvault_core::{CompressionAdapter, GzipCompressor};
///
/// let gzip = GzipCompressor::with_level(9);
/// let blob = gzip.compress(br#"{"collections":[]}"#)?;
/// assert_eq!(gzip.decompress(&blob)?, br#"{"collections":[]}"#);
/// # Ok::<(), docvault_core::VaultError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    /// Level 6
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// Levels above 9 are clamped
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn encoder<'a>(&self, input: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        Box::new(GzEncoder::new(input, self.level))
    }

    fn decoder<'a>(&self, input: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        Box::new(GzDecoder::new(input))
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}

/// Identity adapter for uncompressed blobs
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl CompressionAdapter for NoCompression {
    fn encoder<'a>(&self, input: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        input
    }

    fn decoder<'a>(&self, input: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        input
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }
}

pub fn looks_gzipped(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Vec<u8> {
        br#"{"id":"p-1","data":{"name":"widget","price":12}}"#.repeat(25)
    }

    #[test]
    fn test_gzip_shrinks_repetitive_documents() {
        let gzip = GzipCompressor::new();
        let compressed = gzip.compress(&payload()).unwrap();

        assert!(compressed.len() < payload().len());
        assert!(looks_gzipped(&compressed));
        assert_eq!(gzip.decompress(&compressed).unwrap(), payload());
    }

    #[test]
    fn test_higher_level_is_never_larger() {
        let light = GzipCompressor::with_level(1).compress(&payload()).unwrap();
        let heavy = GzipCompressor::with_level(42).compress(&payload()).unwrap();

        assert!(heavy.len() <= light.len());
        assert_eq!(GzipCompressor::new().decompress(&heavy).unwrap(), payload());
    }

    #[test]
    fn test_identity_adapter_leaves_bytes_alone() {
        let raw = NoCompression::new();
        let out = raw.compress(b"plain").unwrap();

        assert_eq!(out, b"plain");
        assert!(!looks_gzipped(&out));
        assert_eq!(raw.algorithm_name(), "none");
    }

    #[test]
    fn test_gzip_of_empty_input() {
        let gzip = GzipCompressor::new();
        let compressed = gzip.compress(b"").unwrap();
        assert!(looks_gzipped(&compressed));
        assert!(gzip.decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_decoding_garbage_is_a_compression_error() {
        let err = GzipCompressor::new().decompress(b"{\"not\":\"gzip\"}").unwrap_err();
        assert!(matches!(err, VaultError::Compression(_)));
        assert!(err.to_string().contains("gzip decode failed"));
    }
}
