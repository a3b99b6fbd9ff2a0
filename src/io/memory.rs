use super::{SourceStream, StreamProvider};
use anyhow::{Result, anyhow};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory provider keyed by slash-separated paths.
///
/// Tracks how many streams are currently open so callers can verify that
/// sessions release everything they acquired.
#[derive(Default)]
pub struct MemoryProvider {
    files: BTreeMap<String, Arc<[u8]>>,
    chunk_size: Option<usize>,
    live: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `size` as the preferred chunk size of every stream.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), Arc::from(data.into()));
    }

    /// Streams opened and not yet dropped.
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Streams opened over the provider's lifetime.
    pub fn total_opens(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl StreamProvider for MemoryProvider {
    fn open(&self, path: &str) -> Result<Box<dyn SourceStream>> {
        let data = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("No such file: {path}"))?;
        self.live.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStream {
            cursor: Cursor::new(data),
            chunk_size: self.chunk_size,
            live: self.live.clone(),
        }))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = if dir.is_empty() || dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };
        Ok(self
            .files
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(str::to_string)
            .collect())
    }
}

struct MemoryStream {
    cursor: Cursor<Arc<[u8]>>,
    chunk_size: Option<usize>,
    live: Arc<AtomicUsize>,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl SourceStream for MemoryStream {
    fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
