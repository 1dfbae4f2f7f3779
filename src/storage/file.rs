use std::{
    fmt::Debug,
    fs::File,
    io,
    ops::Deref,
    path::{Component, Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use fs2::FileExt;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::instrument;
use walkdir::WalkDir;

use crate::{
    config::ObjectOptions,
    storage::{self, BoxHandle, DEFAULT_CHUNK_SIZE, FileInfo, OpenMode},
};

const META_SUFFIX: &str = ".meta.json";
const PARTIAL_SUFFIX: &str = ".partial";
const READ_BUF_LIMIT: usize = 1024 * 1024;

/// `<root>/<namespace>/<name>` holds the content and `<name>.meta.json` its
/// [`FileInfo`]. Writes land in a temporary file that replaces the object on
/// close.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: Arc<PathBuf>,
    sequence: Arc<AtomicU64>,
}

impl FileBackend {
    #[instrument(err)]
    pub async fn new<P: Into<PathBuf> + Debug>(root: P) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        Ok(Self {
            root: Arc::new(root),
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str, namespace: &str) -> io::Result<PathBuf> {
        validate_name(namespace)?;
        validate_name(name)?;
        Ok(self.root.join(namespace).join(name))
    }
}

fn validate_name(name: &str) -> io::Result<()> {
    let invalid = |reason: &str| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid object name {:?}: {}", name, reason),
        )
    };

    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.ends_with(META_SUFFIX) || name.ends_with(PARTIAL_SUFFIX) {
        return Err(invalid("reserved suffix"));
    }
    if !Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(invalid("must be a relative path without . or .."));
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut path = path.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

async fn load_info(path: &Path) -> io::Result<FileInfo> {
    let raw = fs::read(with_suffix(path, META_SUFFIX)).await?;
    serde_json::from_slice(&raw).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid object metadata: {}", e),
        )
    })
}

#[async_trait]
impl storage::Backend for FileBackend {
    fn handle(&self, name: &str, mode: OpenMode, options: &ObjectOptions) -> BoxHandle {
        let target = FileTarget {
            name: name.to_string(),
            options: options.clone(),
            path: self.object_path(name, &options.namespace),
        };

        match mode {
            OpenMode::Read => Box::new(FileReadHandle {
                target,
                state: None,
            }),
            OpenMode::Write => Box::new(FileWriteHandle {
                target,
                sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                state: None,
            }),
        }
    }

    #[instrument(skip(self), err)]
    async fn list(&self, namespace: &str) -> io::Result<Vec<String>> {
        validate_name(namespace)?;
        let dir = self.root.join(namespace);
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    let relative = entry.path().strip_prefix(&dir).ok()?;
                    let name = relative
                        .components()
                        .map(|c| c.as_os_str().to_str())
                        .collect::<Option<Vec<_>>>()?
                        .join("/");
                    (!name.ends_with(META_SUFFIX) && !name.ends_with(PARTIAL_SUFFIX))
                        .then_some(name)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(io::Error::other)
    }

    #[instrument(skip(self), err)]
    async fn unlink(&self, name: &str, namespace: &str) -> io::Result<()> {
        let path = self.object_path(name, namespace)?;
        fs::remove_file(with_suffix(&path, META_SUFFIX)).await?;

        match fs::remove_file(&path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

struct FileTarget {
    name: String,
    options: ObjectOptions,
    path: io::Result<PathBuf>,
}

impl FileTarget {
    fn path(&self) -> io::Result<&Path> {
        self.path
            .as_ref()
            .map(PathBuf::as_path)
            .map_err(|e| io::Error::new(e.kind(), e.to_string()))
    }
}

struct FileLock {
    inner: File,
}

impl FileLock {
    fn new(file: File) -> io::Result<Self> {
        FileExt::lock_shared(&file)?;

        Ok(Self { inner: file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.inner);
    }
}

impl Deref for FileLock {
    type Target = File;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

struct OpenReader {
    file: fs::File,
    _lock: FileLock,
}

struct FileReadHandle {
    target: FileTarget,
    state: Option<OpenReader>,
}

#[async_trait]
impl storage::StorageHandle for FileReadHandle {
    #[instrument(level = "trace", skip(self), err)]
    async fn open(&mut self) -> io::Result<FileInfo> {
        let path = self.target.path()?.to_path_buf();
        let info = load_info(&path).await?;

        let lock = tokio::task::spawn_blocking(move || File::open(&path).and_then(FileLock::new))
            .await
            .map_err(io::Error::other)??;
        let file = fs::File::from_std(lock.try_clone()?);

        self.state = Some(OpenReader { file, _lock: lock });
        Ok(info)
    }

    async fn read(&mut self, max: usize) -> io::Result<Bytes> {
        let reader = self.state.as_mut().ok_or_else(not_open)?;

        let mut buffer = vec![0u8; max.min(READ_BUF_LIMIT)];
        let n = reader.file.read(&mut buffer).await?;
        buffer.truncate(n);

        Ok(Bytes::from(buffer))
    }

    async fn write(&mut self, _chunk: Bytes) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "handle opened for reading",
        ))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.state.take().map(|_| ()).ok_or_else(not_open)
    }
}

struct OpenWriter {
    file: fs::File,
    partial: PathBuf,
    info: FileInfo,
    hasher: blake3::Hasher,
}

struct FileWriteHandle {
    target: FileTarget,
    sequence: u64,
    state: Option<OpenWriter>,
}

#[async_trait]
impl storage::StorageHandle for FileWriteHandle {
    #[instrument(level = "trace", skip(self), err)]
    async fn open(&mut self) -> io::Result<FileInfo> {
        let path = self.target.path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let partial = with_suffix(
            path,
            &format!(".{}-{}{}", std::process::id(), self.sequence, PARTIAL_SUFFIX),
        );
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .await?;

        let info = FileInfo::pending(&self.target.name, &self.target.options, DEFAULT_CHUNK_SIZE);
        self.state = Some(OpenWriter {
            file,
            partial,
            info: info.clone(),
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
        let writer = self.state.as_mut().ok_or_else(not_open)?;

        writer.file.write_all(&chunk).await?;
        writer.hasher.update(&chunk);
        writer.info.length += chunk.len() as u64;

        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn close(&mut self) -> io::Result<()> {
        let OpenWriter {
            mut file,
            partial,
            mut info,
            hasher,
        } = self.state.take().ok_or_else(not_open)?;

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        info.hash = hasher.finalize().to_hex().to_string();
        let meta = serde_json::to_vec_pretty(&info).map_err(io::Error::other)?;

        let path = self.target.path()?;
        fs::rename(&partial, path).await?;
        fs::write(with_suffix(path, META_SUFFIX), meta).await?;

        Ok(())
    }
}

impl Drop for FileWriteHandle {
    fn drop(&mut self) {
        // Never closed: the object was not published, drop the partial data.
        if let Some(writer) = self.state.take() {
            let _ = std::fs::remove_file(&writer.partial);
        }
    }
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "handle is not open")
}
