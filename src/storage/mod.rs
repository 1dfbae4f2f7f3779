use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::ObjectOptions;

pub use file::FileBackend;
pub use memory::MemoryBackend;

mod file;
mod memory;

pub type BoxHandle = Box<dyn StorageHandle>;

/// GridFS' default chunk size.
pub const DEFAULT_CHUNK_SIZE: u32 = 255 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub namespace: String,
    pub length: u64,
    pub chunk_size: u32,
    pub content_type: Option<String>,
    /// Hex BLAKE3 of the content. Empty while an object is being written.
    pub hash: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl FileInfo {
    pub(crate) fn pending(name: &str, options: &ObjectOptions, chunk_size: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: options.namespace.clone(),
            length: 0,
            chunk_size,
            content_type: options.content_type.clone(),
            hash: String::new(),
            metadata: options.metadata.clone(),
        }
    }
}

/// One open/close cycle against a single named object.
///
/// Every method takes `&mut self`: a handle never sees a second operation
/// while one is still pending.
#[async_trait]
pub trait StorageHandle: Send + 'static {
    async fn open(&mut self) -> io::Result<FileInfo>;

    /// Reads at most `max` bytes. An empty result means the object is exhausted.
    async fn read(&mut self, max: usize) -> io::Result<Bytes>;

    async fn write(&mut self, chunk: Bytes) -> io::Result<()>;

    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn handle(&self, name: &str, mode: OpenMode, options: &ObjectOptions) -> BoxHandle;

    async fn list(&self, namespace: &str) -> io::Result<Vec<String>>;

    /// Removes an object. Fails with `io::ErrorKind::NotFound` if it does not exist.
    async fn unlink(&self, name: &str, namespace: &str) -> io::Result<()>;
}
