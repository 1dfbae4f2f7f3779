use std::{io, sync::Arc};

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("failed to open {name}: {source}")]
    OpenFailure {
        name: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("i/o failure on {name}: {source}")]
    IoFailure {
        name: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("stream already finished")]
    Finished,

    /// The stream stopped before this queued write was acknowledged.
    #[error("queued write discarded by a failed stream")]
    Discarded,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn open(name: &str, source: io::Error) -> Self {
        Self::OpenFailure {
            name: name.to_string(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn io(name: &str, source: io::Error) -> Self {
        Self::IoFailure {
            name: name.to_string(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn from_backend(name: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(name.to_string()),
            io::ErrorKind::InvalidInput => Self::InvalidArgument(source.to_string()),
            _ => Self::io(name, source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::OpenFailure { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::OpenFailure { source, .. } | Error::IoFailure { source, .. } => source.kind(),
            Error::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            Error::NotFound(_) => io::ErrorKind::NotFound,
            Error::Finished => io::ErrorKind::BrokenPipe,
            Error::Discarded => io::ErrorKind::Other,
        };

        io::Error::new(kind, err)
    }
}
