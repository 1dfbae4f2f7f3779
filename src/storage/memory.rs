use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::instrument;

use crate::{
    config::ObjectOptions,
    storage::{self, BoxHandle, DEFAULT_CHUNK_SIZE, FileInfo, OpenMode},
};

#[derive(Debug, Clone)]
struct StoredObject {
    info: FileInfo,
    chunks: Vec<Bytes>,
}

type Namespaces = HashMap<String, BTreeMap<String, StoredObject>>;

/// Objects are split into `chunk_size` pieces when a write handle closes;
/// until then readers keep seeing the previous version.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    chunk_size: u32,
    namespaces: Arc<RwLock<Namespaces>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl MemoryBackend {
    pub fn new(chunk_size: u32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            namespaces: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn contents(&self, name: &str, namespace: &str) -> Option<Bytes> {
        let namespaces = self.namespaces.read().ok()?;
        let object = namespaces.get(namespace)?.get(name)?;
        Some(object.chunks.concat().into())
    }

    pub fn chunk_count(&self, name: &str, namespace: &str) -> Option<usize> {
        let namespaces = self.namespaces.read().ok()?;
        namespaces
            .get(namespace)?
            .get(name)
            .map(|object| object.chunks.len())
    }

    fn lookup(&self, name: &str, namespace: &str) -> io::Result<StoredObject> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        namespaces
            .get(namespace)
            .and_then(|objects| objects.get(name))
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    fn commit(&self, info: FileInfo, chunks: Vec<Bytes>) -> io::Result<()> {
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        namespaces
            .entry(info.namespace.clone())
            .or_default()
            .insert(info.name.clone(), StoredObject { info, chunks });
        Ok(())
    }
}

#[async_trait]
impl storage::Backend for MemoryBackend {
    fn handle(&self, name: &str, mode: OpenMode, options: &ObjectOptions) -> BoxHandle {
        let target = Target {
            name: name.to_string(),
            options: options.clone(),
            backend: self.clone(),
        };

        match mode {
            OpenMode::Read => Box::new(MemoryReadHandle {
                target,
                object: None,
                chunk: 0,
                offset: 0,
            }),
            OpenMode::Write => Box::new(MemoryWriteHandle {
                target,
                state: None,
            }),
        }
    }

    #[instrument(skip(self), err)]
    async fn list(&self, namespace: &str) -> io::Result<Vec<String>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        Ok(namespaces
            .get(namespace)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default())
    }

    #[instrument(skip(self), err)]
    async fn unlink(&self, name: &str, namespace: &str) -> io::Result<()> {
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        namespaces
            .get_mut(namespace)
            .and_then(|objects| objects.remove(name))
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }
}

struct Target {
    name: String,
    options: ObjectOptions,
    backend: MemoryBackend,
}

struct MemoryReadHandle {
    target: Target,
    object: Option<StoredObject>,
    chunk: usize,
    offset: usize,
}

#[async_trait]
impl storage::StorageHandle for MemoryReadHandle {
    async fn open(&mut self) -> io::Result<FileInfo> {
        let object = self
            .target
            .backend
            .lookup(&self.target.name, &self.target.options.namespace)?;
        let info = object.info.clone();
        self.object = Some(object);
        Ok(info)
    }

    async fn read(&mut self, max: usize) -> io::Result<Bytes> {
        let object = self.object.as_ref().ok_or_else(not_open)?;

        let mut out = BytesMut::new();
        while out.len() < max {
            let Some(chunk) = object.chunks.get(self.chunk) else {
                break;
            };
            let take = (chunk.len() - self.offset).min(max - out.len());
            out.extend_from_slice(&chunk[self.offset..self.offset + take]);
            self.offset += take;
            if self.offset == chunk.len() {
                self.chunk += 1;
                self.offset = 0;
            }
        }

        Ok(out.freeze())
    }

    async fn write(&mut self, _chunk: Bytes) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "handle opened for reading",
        ))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.object.take().map(|_| ()).ok_or_else(not_open)
    }
}

struct PendingObject {
    info: FileInfo,
    buffer: BytesMut,
    hasher: blake3::Hasher,
}

struct MemoryWriteHandle {
    target: Target,
    state: Option<PendingObject>,
}

#[async_trait]
impl storage::StorageHandle for MemoryWriteHandle {
    async fn open(&mut self) -> io::Result<FileInfo> {
        let info = FileInfo::pending(
            &self.target.name,
            &self.target.options,
            self.target.backend.chunk_size,
        );

        self.state = Some(PendingObject {
            info: info.clone(),
            buffer: BytesMut::new(),
            hasher: blake3::Hasher::new(),
        });

        Ok(info)
    }

    async fn read(&mut self, _max: usize) -> io::Result<Bytes> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "handle opened for writing",
        ))
    }

    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        let pending = self.state.as_mut().ok_or_else(not_open)?;
        pending.hasher.update(&chunk);
        pending.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        let PendingObject {
            mut info,
            mut buffer,
            hasher,
        } = self.state.take().ok_or_else(not_open)?;

        info.length = buffer.len() as u64;
        info.hash = hasher.finalize().to_hex().to_string();

        let chunk_size = info.chunk_size as usize;
        let mut chunks = Vec::with_capacity(buffer.len().div_ceil(chunk_size));
        while !buffer.is_empty() {
            let take = chunk_size.min(buffer.len());
            chunks.push(buffer.split_to(take).freeze());
        }

        self.target.backend.commit(info, chunks)
    }
}

fn not_found(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such object: {}", name))
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "handle is not open")
}

fn poisoned<T>(_: T) -> io::Error {
    io::Error::other("memory backend lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Backend;

    async fn put(backend: &MemoryBackend, name: &str, parts: &[&[u8]]) {
        let mut handle = backend.handle(name, OpenMode::Write, &ObjectOptions::new("fs"));
        handle.open().await.unwrap();
        for part in parts {
            handle.write(Bytes::copy_from_slice(part)).await.unwrap();
        }
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn splits_into_chunks_on_close() {
        let backend = MemoryBackend::new(4);
        put(&backend, "a.bin", &[&b"hello"[..], &b" world"[..]]).await;

        assert_eq!(backend.chunk_count("a.bin", "fs"), Some(3));
        assert_eq!(backend.contents("a.bin", "fs").unwrap(), &b"hello world"[..]);
    }

    #[tokio::test]
    async fn reads_across_chunk_boundaries() {
        let backend = MemoryBackend::new(4);
        put(&backend, "a.bin", &[&b"hello world"[..]]).await;

        let mut handle = backend.handle("a.bin", OpenMode::Read, &ObjectOptions::new("fs"));
        let info = handle.open().await.unwrap();
        assert_eq!(info.length, 11);
        assert_eq!(info.hash, blake3::hash(b"hello world").to_hex().to_string());

        assert_eq!(handle.read(6).await.unwrap(), &b"hello "[..]);
        assert_eq!(handle.read(100).await.unwrap(), &b"world"[..]);
        assert!(handle.read(100).await.unwrap().is_empty());
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn unfinished_write_is_invisible() {
        let backend = MemoryBackend::default();
        let mut handle = backend.handle("a.bin", OpenMode::Write, &ObjectOptions::new("fs"));
        handle.open().await.unwrap();
        handle.write(Bytes::from_static(b"partial")).await.unwrap();

        assert!(backend.contents("a.bin", "fs").is_none());
        assert!(backend.list("fs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_object_fails_open_with_not_found() {
        let backend = MemoryBackend::default();
        let mut handle = backend.handle("nope", OpenMode::Read, &ObjectOptions::new("fs"));
        let err = handle.open().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_and_unlink_are_per_namespace() {
        let backend = MemoryBackend::default();
        put(&backend, "b.txt", &[&b"b"[..]]).await;
        put(&backend, "a.txt", &[&b"a"[..]]).await;

        assert_eq!(backend.list("fs").await.unwrap(), vec!["a.txt", "b.txt"]);
        assert!(backend.list("other").await.unwrap().is_empty());

        let err = backend.unlink("a.txt", "other").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        backend.unlink("a.txt", "fs").await.unwrap();
        assert_eq!(backend.list("fs").await.unwrap(), vec!["b.txt"]);
    }
}
