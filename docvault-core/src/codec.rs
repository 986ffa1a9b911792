/*!
Snapshot serialization, compression and persistence.

The codec turns a [`Snapshot`] into a blob in the backup store and back:

```text
write: Snapshot -> JSON -> [gzip encoder] -> digest -> BackupStore::create
read:  BackupStore::open -> digest -> [gzip decoder] -> JSON -> Snapshot
```

Blobs are named `<kind>_<epochMillis>` with a `.gz` suffix when compressed.
The store's `create` is all-or-nothing, so a failed write never leaves a
truncated blob behind, and a write is retried as a whole on transient errors.
*/

use crate::compression::{looks_gzipped, CompressionAdapter, GzipCompressor, NoCompression};
use crate::metadata::BackupKind;
use crate::snapshot::Snapshot;
use crate::storage::BackupStore;
use crate::{Result, VaultError};
use docvault_retry::{retry_blocking, RetryPolicy};
use sha2::{Digest, Sha256};
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;
use tracing::debug;

const GZIP_SUFFIX: &str = ".gz";

/// Whether a storage key names a gzip-compressed blob
pub fn is_compressed_key(key: &str) -> bool {
    key.ends_with(GZIP_SUFFIX)
}

/// Components of a well-formed storage key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub backup_id: String,
    pub kind: BackupKind,
    pub epoch_millis: i64,
    pub compressed: bool,
}

/// Parse `<kind>_<epochMillis>[.gz]`; anything else yields `None`
pub fn parse_storage_key(key: &str) -> Option<ParsedKey> {
    let compressed = is_compressed_key(key);
    let backup_id = key.strip_suffix(GZIP_SUFFIX).unwrap_or(key);
    let (kind, millis) = backup_id.split_once('_')?;
    let kind = kind.parse::<BackupKind>().ok()?;
    let epoch_millis = millis.parse::<i64>().ok()?;
    Some(ParsedKey {
        backup_id: backup_id.to_string(),
        kind,
        epoch_millis,
        compressed,
    })
}

/// Size and SHA-256 of the bytes that crossed the store boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDigest {
    pub size_bytes: u64,
    pub checksum: String,
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBlob {
    pub key: String,
    pub digest: BlobDigest,
}

/// Reader adapter that hashes and counts everything read through it
struct DigestReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> DigestReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> BlobDigest {
        BlobDigest {
            size_bytes: self.bytes,
            checksum: format!("{:x}", self.hasher.finalize()),
        }
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

pub struct StorageCodec {
    store: Arc<dyn BackupStore>,
    gzip: GzipCompressor,
    raw: NoCompression,
    retry: RetryPolicy,
}

impl StorageCodec {
    pub fn new(store: Arc<dyn BackupStore>) -> Self {
        Self {
            store,
            gzip: GzipCompressor::new(),
            raw: NoCompression::new(),
            retry: RetryPolicy::local_storage(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.gzip = GzipCompressor::with_level(level);
        self
    }

    pub fn store(&self) -> &Arc<dyn BackupStore> {
        &self.store
    }

    /// Storage key for a backup id
    pub fn storage_key(backup_id: &str, compress: bool) -> String {
        if compress {
            format!("{backup_id}{GZIP_SUFFIX}")
        } else {
            backup_id.to_string()
        }
    }

    fn adapter(&self, compressed: bool) -> &dyn CompressionAdapter {
        if compressed {
            &self.gzip
        } else {
            &self.raw
        }
    }

    /// Serialize `snapshot` and store it under a key derived from its id
    ///
    /// # Errors
    /// * `VaultError::Json` - If the snapshot cannot be serialized
    /// * `VaultError::Io` / `VaultError::Storage` - If the store rejects the write
    pub fn write(&self, snapshot: &Snapshot, compress: bool) -> Result<WrittenBlob> {
        let key = Self::storage_key(&snapshot.metadata.id, compress);
        let body = serde_json::to_vec(snapshot)?;
        let adapter = self.adapter(compress);

        let digest = retry_blocking("codec.write", &self.retry, |attempt| {
            let mut reader = DigestReader::new(adapter.encoder(Box::new(&body[..])));
            self.store.create(&key, &mut reader)?;
            debug!(key = %key, attempt, "Snapshot blob written");
            Ok::<_, VaultError>(reader.finish())
        })?;

        debug!(
            key = %key,
            serialized_bytes = body.len(),
            stored_bytes = digest.size_bytes,
            algorithm = adapter.algorithm_name(),
            "Encoded snapshot"
        );
        Ok(WrittenBlob { key, digest })
    }

    /// Load and decode the snapshot stored under `key`
    pub fn read(&self, key: &str) -> Result<Snapshot> {
        self.read_with_digest(key).map(|(snapshot, _)| snapshot)
    }

    /// Load a snapshot along with the digest of the stored bytes
    ///
    /// Compression is detected from the key suffix, falling back to the gzip
    /// magic bytes for blobs that were renamed.
    ///
    /// # Errors
    /// * `VaultError::CorruptSnapshot` - If decompression or deserialization fails
    /// * `VaultError::Io` / `VaultError::Storage` - If the blob cannot be read
    pub fn read_with_digest(&self, key: &str) -> Result<(Snapshot, BlobDigest)> {
        let raw = self.store.open(key)?;
        let mut buffered = BufReader::new(DigestReader::new(raw));

        let compressed = is_compressed_key(key) || looks_gzipped(buffered.fill_buf()?);
        let mut decoded = Vec::new();
        {
            let mut decoder = self.adapter(compressed).decoder(Box::new(&mut buffered));
            decoder
                .read_to_end(&mut decoded)
                .map_err(|e| classify_read_error(key, e))?;
        }
        // Hash whatever trails the compressed stream too.
        io::copy(&mut buffered, &mut io::sink())?;
        let digest = buffered.into_inner().finish();

        let snapshot: Snapshot = serde_json::from_slice(&decoded)
            .map_err(|e| VaultError::corrupt(key, format!("invalid snapshot encoding: {e}")))?;

        debug!(key = %key, bytes = digest.size_bytes, compressed, "Decoded snapshot");
        Ok((snapshot, digest))
    }
}

fn classify_read_error(key: &str, err: io::Error) -> VaultError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            VaultError::corrupt(key, format!("failed to decompress: {err}"))
        }
        _ => VaultError::Io(err),
    }
}
