use std::{io, sync::Arc};

use tracing::{debug, instrument};

use crate::{
    config::{GridFsConfig, ReadOptions, WriteOptions},
    error::{Error, Result},
    reader::ReadStream,
    storage::{Backend, FileInfo, OpenMode},
    writer::WriteStream,
};

#[derive(Debug)]
pub struct GridFs<B: Backend> {
    backend: Arc<B>,
    config: Arc<GridFsConfig>,
}

impl<B: Backend> Clone for GridFs<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: Backend> GridFs<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            config: Arc::new(GridFsConfig::default()),
        }
    }

    pub fn with_config(backend: Arc<B>, config: GridFsConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            backend,
            config: Arc::new(config),
        })
    }

    pub fn with_namespace(&self, namespace: impl Into<String>) -> Result<Self> {
        let config = self.config.as_ref().clone().with_namespace(namespace);
        Self::with_config(self.backend.clone(), config)
    }

    pub fn config(&self) -> &GridFsConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    #[instrument(skip(self, options), fields(namespace = %self.config.namespace))]
    pub fn create_write_stream(&self, name: &str, options: WriteOptions) -> Result<WriteStream> {
        validate_name(name)?;

        let options = self.config.resolve_write(name, options);
        debug!(?options, "creating write stream");
        let handle = self.backend.handle(name, OpenMode::Write, &options);

        Ok(WriteStream::new(name, handle, self.config.max_pending))
    }

    #[instrument(skip(self, options), fields(namespace = %self.config.namespace))]
    pub fn create_read_stream(&self, name: &str, options: ReadOptions) -> Result<ReadStream> {
        validate_name(name)?;

        let pull_size = options.pull_size.unwrap_or(self.config.pull_size);
        let options = self.config.resolve_read(&options);
        let handle = self.backend.handle(name, OpenMode::Read, &options);

        Ok(ReadStream::new(name, handle, pull_size))
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        self.backend
            .unlink(name, &self.config.namespace)
            .await
            .map_err(|e| Error::from_backend(name, e))
    }

    /// Metadata of `name`, or `None` if it does not exist.
    ///
    /// The handle opened for the lookup is always closed again.
    #[instrument(skip(self), err)]
    pub async fn stat(&self, name: &str) -> Result<Option<FileInfo>> {
        validate_name(name)?;

        let options = self.config.resolve_read(&ReadOptions::default());
        let mut handle = self.backend.handle(name, OpenMode::Read, &options);

        let opened = match handle.open().await {
            Ok(info) => info,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::open(name, e)),
        };

        let checked = check_info(name, opened);
        handle.close().await.map_err(|e| Error::io(name, e))?;

        checked.map(Some)
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.stat(name).await?.is_some())
    }

    #[instrument(skip(self), err)]
    pub async fn list(&self) -> Result<Vec<String>> {
        let namespace = &self.config.namespace;
        self.backend
            .list(namespace)
            .await
            .map_err(|e| Error::io(namespace, e))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("object name must not be empty".into()));
    }
    Ok(())
}

fn check_info(name: &str, info: FileInfo) -> Result<FileInfo> {
    if info.name != name {
        return Err(Error::io(
            name,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("store returned metadata for {:?}", info.name),
            ),
        ));
    }
    Ok(info)
}
