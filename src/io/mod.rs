//! Streaming file provider boundary.
//!
//! Everything above this module sees storage only through [`StreamProvider`]
//! and the [`SourceStream`] handles it opens, so archives can live on local
//! disk, behind an HTTP server that honours Range requests, or in memory.

mod http;
mod local;
mod memory;

pub use http::{HttpProvider, HttpStream};
pub use local::LocalProvider;
pub use memory::MemoryProvider;

use anyhow::Result;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;

/// Seek origin, mirroring `SEEK_SET` / `SEEK_CUR` / `SEEK_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    /// Convert a raw C-style whence value (0, 1, 2).
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Whence::Set),
            1 => Some(Whence::Current),
            2 => Some(Whence::End),
            _ => None,
        }
    }

    /// Build a [`SeekFrom`] for `offset` relative to this origin.
    ///
    /// Returns `None` for a negative absolute offset.
    pub fn to_seek_from(self, offset: i64) -> Option<SeekFrom> {
        match self {
            Whence::Set => u64::try_from(offset).ok().map(SeekFrom::Start),
            Whence::Current => Some(SeekFrom::Current(offset)),
            Whence::End => Some(SeekFrom::End(offset)),
        }
    }
}

/// An open byte stream handed out by a [`StreamProvider`].
///
/// Closing a stream is dropping it.
pub trait SourceStream: Read + Seek + Send {
    /// Preferred read size for this stream, if the backend has one.
    fn chunk_size(&self) -> Option<usize> {
        None
    }
}

/// Storage backend able to open, probe and enumerate paths.
pub trait StreamProvider: Send + Sync {
    /// Open the stream at `path`.
    fn open(&self, path: &str) -> Result<Box<dyn SourceStream>>;

    /// Whether `path` exists.
    fn exists(&self, path: &str) -> bool;

    /// Names (not full paths) of the entries in directory `dir`.
    fn list_dir(&self, dir: &str) -> Result<Vec<String>>;

    /// Filesystem path backing `path`, when the provider serves local files.
    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

/// Provider that routes `http://` and `https://` paths to [`HttpProvider`]
/// and everything else to [`LocalProvider`].
pub struct DefaultProvider {
    local: LocalProvider,
    http: HttpProvider,
}

impl DefaultProvider {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            local: LocalProvider,
            http: HttpProvider::new(config)?,
        })
    }

    /// Shared handle, as sessions expect.
    pub fn shared(config: &Config) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(config)?))
    }

    /// The HTTP backend, for transfer statistics.
    pub fn http(&self) -> &HttpProvider {
        &self.http
    }

    fn route(&self, path: &str) -> &dyn StreamProvider {
        if is_http_url(path) {
            &self.http
        } else {
            &self.local
        }
    }
}

impl StreamProvider for DefaultProvider {
    fn open(&self, path: &str) -> Result<Box<dyn SourceStream>> {
        self.route(path).open(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.route(path).exists(path)
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        self.route(dir).list_dir(dir)
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        self.route(path).local_path(path)
    }
}

pub fn is_http_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}
