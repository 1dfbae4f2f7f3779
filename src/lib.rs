//! Streaming access to chunked object stores.
//!
//! [`GridFs`] hands out [`WriteStream`]s and [`ReadStream`]s that are usable
//! the moment they are created. Writes and pulls issued while the underlying
//! [`StorageHandle`] is still opening are queued and replayed in order once it
//! opens, with at most one handle operation in flight per stream.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use gridstream::{GridFs, MemoryBackend, ReadOptions, WriteOptions};
//! use futures::TryStreamExt;
//!
//! # async fn demo() -> gridstream::Result<()> {
//! let fs = GridFs::new(Arc::new(MemoryBackend::default()));
//!
//! let mut out = fs.create_write_stream("alice.txt", WriteOptions::default())?;
//! let _ = out.push("down the ");
//! let _ = out.push("rabbit hole");
//! out.finish().await?;
//!
//! let input = fs.create_read_stream("alice.txt", ReadOptions::default())?;
//! let chunks: Vec<_> = input.try_collect().await?;
//! assert_eq!(chunks.concat(), b"down the rabbit hole");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encoding;
pub mod error;
pub mod gridfs;
pub mod reader;
pub mod state;
pub mod storage;
pub mod writer;

pub use config::{GridFsConfig, ObjectOptions, ReadOptions, WriteOptions};
pub use encoding::Encoding;
pub use error::{Error, Result};
pub use gridfs::GridFs;
pub use reader::{ReadEvent, ReadStream};
pub use state::StreamState;
pub use storage::{
    Backend, BoxHandle, FileBackend, FileInfo, MemoryBackend, OpenMode, StorageHandle,
};
pub use writer::{WriteAck, WriteStream};
