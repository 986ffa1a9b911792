/*!
Backup store adapters.

This module defines the backup store abstraction (port) and concrete
implementations (adapters). The coordinators only ever see [`BackupStore`].
*/

pub mod local;
pub mod memory;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::Read;

#[cfg(feature = "async-rt")]
use crate::VaultError;
#[cfg(feature = "async-rt")]
use docvault_retry::{with_backoff, RetryPolicy};
#[cfg(feature = "async-rt")]
use once_cell::sync::Lazy;
#[cfg(feature = "async-rt")]
use std::sync::Arc;
#[cfg(feature = "async-rt")]
use tokio::runtime::Runtime;

#[cfg(feature = "async-rt")]
static GLOBAL_RT: Lazy<std::result::Result<Runtime, String>> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(4))
        .thread_name("docvault-store")
        .enable_all()
        .build()
        .map_err(|e| e.to_string())
});

#[cfg(feature = "async-rt")]
fn global_runtime() -> Result<&'static Runtime> {
    GLOBAL_RT
        .as_ref()
        .map_err(|e| VaultError::storage(format!("Failed to create async runtime: {e}")))
}

/// Name and size of a stored blob
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub key: String,
    pub size_bytes: u64,
}

/// Durable, byte-addressable store for snapshot blobs
///
/// Keys form a flat namespace. `create` is all-or-nothing: readers never
/// observe a partially written blob, and an existing key is never overwritten.
pub trait BackupStore: Send + Sync {
    /// Stream `body` into a new blob under `key`
    ///
    /// # Returns
    /// The number of bytes stored
    fn create(&self, key: &str, body: &mut dyn Read) -> Result<u64>;

    /// Open a blob for streaming reads
    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>>;

    /// List all complete blobs
    fn list(&self) -> Result<Vec<BlobInfo>>;

    /// Delete a blob. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> bool;
}

/// Async store abstraction for remote object stores
///
/// Implementations are bridged into the synchronous engine with
/// [`BlockingStore`].
#[async_trait]
pub trait AsyncBackupStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn list(&self) -> Result<Vec<BlobInfo>>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Blocking wrapper for async backup stores
///
/// Every call is driven to completion on a shared multi-threaded runtime and
/// retried with exponential backoff on transient failures. Must not be used
/// from inside an async context.
#[cfg(feature = "async-rt")]
pub struct BlockingStore<A: AsyncBackupStore> {
    inner: Arc<A>,
    retry: RetryPolicy,
}

#[cfg(feature = "async-rt")]
impl<A: AsyncBackupStore> BlockingStore<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            inner: Arc::new(adapter),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(feature = "async-rt")]
impl<A: AsyncBackupStore> BackupStore for BlockingStore<A> {
    fn create(&self, key: &str, body: &mut dyn Read) -> Result<u64> {
        let mut buffer = Vec::new();
        body.read_to_end(&mut buffer)?;
        let data = Bytes::from(buffer);
        let size = data.len() as u64;

        global_runtime()?.block_on(with_backoff("store.put", &self.retry, |_| {
            self.inner.put(key, data.clone())
        }))?;
        Ok(size)
    }

    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let data = global_runtime()?
            .block_on(with_backoff("store.get", &self.retry, |_| self.inner.get(key)))?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    fn list(&self) -> Result<Vec<BlobInfo>> {
        global_runtime()?.block_on(with_backoff("store.list", &self.retry, |_| self.inner.list()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        global_runtime()?
            .block_on(with_backoff("store.delete", &self.retry, |_| self.inner.delete(key)))
    }

    fn exists(&self, key: &str) -> bool {
        global_runtime()
            .and_then(|rt| rt.block_on(self.inner.exists(key)))
            .unwrap_or(false)
    }
}

// Re-export types for convenience
pub use local::FsBackupStore;
pub use memory::MemoryBackupStore;
