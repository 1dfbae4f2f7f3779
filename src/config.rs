use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_NAMESPACE: &str = "fs";
pub const DEFAULT_PULL_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAX_PENDING: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridFsConfig {
    pub namespace: String,
    pub infer_content_type: bool,
    /// Pull size used when a [`ReadStream`](crate::ReadStream) is consumed as a `Stream`.
    pub pull_size: usize,
    pub max_pending: usize,
}

impl Default for GridFsConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            infer_content_type: true,
            pull_size: DEFAULT_PULL_SIZE,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl GridFsConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_content_type_inference(mut self, enabled: bool) -> Self {
        self.infer_content_type = enabled;
        self
    }

    pub fn with_pull_size(mut self, pull_size: usize) -> Self {
        self.pull_size = pull_size;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::InvalidArgument("namespace must not be empty".into()));
        }
        if self.pull_size == 0 {
            return Err(Error::InvalidArgument("pull_size must be positive".into()));
        }
        if self.max_pending == 0 {
            return Err(Error::InvalidArgument("max_pending must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn resolve_write(&self, name: &str, options: WriteOptions) -> ObjectOptions {
        let content_type = options.content_type.or_else(|| {
            self.infer_content_type
                .then(|| mime_guess::from_path(name).first_raw())
                .flatten()
                .map(str::to_string)
        });

        ObjectOptions {
            namespace: options
                .namespace
                .unwrap_or_else(|| self.namespace.clone()),
            content_type,
            metadata: options.metadata.unwrap_or(serde_json::Value::Null),
        }
    }

    pub(crate) fn resolve_read(&self, options: &ReadOptions) -> ObjectOptions {
        ObjectOptions {
            namespace: options
                .namespace
                .clone()
                .unwrap_or_else(|| self.namespace.clone()),
            content_type: None,
            metadata: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub namespace: Option<String>,
    pub content_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl WriteOptions {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub namespace: Option<String>,
    pub pull_size: Option<usize>,
}

impl ReadOptions {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn pull_size(mut self, pull_size: usize) -> Self {
        self.pull_size = Some(pull_size);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectOptions {
    pub namespace: String,
    pub content_type: Option<String>,
    pub metadata: serde_json::Value,
}

impl ObjectOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            content_type: None,
            metadata: serde_json::Value::Null,
        }
    }
}
