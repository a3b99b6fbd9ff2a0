//! Byte-source adapter and the volume chain built on top of it.
//!
//! The decoding engines never touch a provider directly. They pull bytes from
//! a [`VolumeChain`], which drives the five adapter operations (open, read,
//! seek, close, switch) against one [`VolumeHandle`] per physical volume.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result, messages};
use crate::io::{SourceStream, StreamProvider, Whence};
use crate::volume::VolumeSet;

/// Per-volume state mutated in place by [`ByteSourceAdapter`].
pub struct VolumeHandle {
    path: String,
    stream: Option<Box<dyn SourceStream>>,
    buffer: Vec<u8>,
    filled: usize,
}

impl VolumeHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stream: None,
            buffer: Vec::new(),
            filled: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Size of the read buffer, zero while closed.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes produced by the last read.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.filled]
    }

    fn stream_mut(&mut self) -> io::Result<&mut Box<dyn SourceStream>> {
        let path = &self.path;
        self.stream.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("{path} is not open"))
        })
    }
}

/// Forwards the engine's byte-source operations to a [`StreamProvider`].
#[derive(Clone)]
pub struct ByteSourceAdapter {
    provider: Arc<dyn StreamProvider>,
    default_chunk_size: usize,
}

impl ByteSourceAdapter {
    pub fn new(provider: Arc<dyn StreamProvider>, default_chunk_size: usize) -> Self {
        Self {
            provider,
            default_chunk_size,
        }
    }

    pub fn open(&self, handle: &mut VolumeHandle) -> io::Result<()> {
        let stream = self
            .provider
            .open(&handle.path)
            .map_err(|e| io::Error::other(format!("{e:#}")))?;
        let chunk = stream
            .chunk_size()
            .filter(|&n| n > 0)
            .unwrap_or(self.default_chunk_size);
        debug!(path = %handle.path, chunk, "opened volume");
        handle.buffer = vec![0; chunk];
        handle.filled = 0;
        handle.stream = Some(stream);
        Ok(())
    }

    /// One read of buffer-size bytes; an empty slice means end of stream.
    pub fn read<'h>(&self, handle: &'h mut VolumeHandle) -> io::Result<&'h [u8]> {
        handle.filled = 0;
        let n = {
            let path = &handle.path;
            let stream = handle.stream.as_mut().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotConnected, format!("{path} is not open"))
            })?;
            stream.read(&mut handle.buffer)?
        };
        handle.filled = n;
        Ok(handle.data())
    }

    pub fn seek(&self, handle: &mut VolumeHandle, offset: i64, whence: Whence) -> io::Result<u64> {
        let pos = whence.to_seek_from(offset).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "negative absolute seek")
        })?;
        handle.filled = 0;
        handle.stream_mut()?.seek(pos)
    }

    pub fn close(&self, handle: &mut VolumeHandle) {
        if handle.stream.take().is_some() {
            debug!(path = %handle.path, "closed volume");
        }
        handle.buffer = Vec::new();
        handle.filled = 0;
    }

    pub fn switch(&self, from: &mut VolumeHandle, to: &mut VolumeHandle) -> io::Result<()> {
        self.close(from);
        self.open(to)
    }

    pub fn local_path(&self, handle: &VolumeHandle) -> Option<PathBuf> {
        self.provider.local_path(&handle.path)
    }
}

fn missing_volume() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, messages::MISSING_VOLUME)
}

/// The volumes of one archive presented as a single continuous stream.
///
/// Once a later volume fails to open the chain stays failed: the previous
/// volume is already closed, so every further read or seek reports the
/// missing volume again.
pub struct VolumeChain {
    adapter: ByteSourceAdapter,
    volumes: Vec<VolumeHandle>,
    current: usize,
    window: Range<usize>,
    starts: Vec<Option<u64>>,
    sizes: Vec<Option<u64>>,
    pos: u64,
    failed: bool,
}

impl VolumeChain {
    /// Open the first volume of `set`. Failing to open it fails the chain.
    pub fn open(adapter: ByteSourceAdapter, set: &VolumeSet) -> Result<Self> {
        let volumes: Vec<VolumeHandle> = set.paths().iter().map(VolumeHandle::new).collect();
        let count = volumes.len();
        let mut chain = Self {
            adapter,
            volumes,
            current: 0,
            window: 0..0,
            starts: vec![None; count],
            sizes: vec![None; count],
            pos: 0,
            failed: false,
        };
        chain.starts[0] = Some(0);
        let first = &mut chain.volumes[0];
        chain
            .adapter
            .open(first)
            .map_err(|source| Error::SourceOpen {
                path: first.path().to_string(),
                source,
            })?;
        chain.measure(0)?;
        Ok(chain)
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Index of the volume currently open.
    pub fn current_volume(&self) -> usize {
        self.current
    }

    pub fn volumes(&self) -> &[VolumeHandle] {
        &self.volumes
    }

    /// Filesystem paths of every volume, if the provider serves them all
    /// from local disk.
    pub fn local_paths(&self) -> Option<Vec<PathBuf>> {
        self.volumes
            .iter()
            .map(|handle| self.adapter.local_path(handle))
            .collect()
    }

    /// Copy the raw bytes of volume `index` into `out`, leaving the chain's
    /// logical position unchanged.
    pub fn copy_volume(&mut self, index: usize, out: &mut dyn Write) -> io::Result<u64> {
        if self.failed {
            return Err(missing_volume());
        }
        let saved = self.pos;
        self.switch_to(index)?;
        let handle = &mut self.volumes[index];
        self.adapter.seek(handle, 0, Whence::Set)?;
        let mut copied = 0u64;
        loop {
            let data = self.adapter.read(handle)?;
            if data.is_empty() {
                break;
            }
            out.write_all(data)?;
            copied += data.len() as u64;
        }
        self.window = 0..0;
        self.seek(SeekFrom::Start(saved))?;
        Ok(copied)
    }

    fn measure(&mut self, index: usize) -> io::Result<()> {
        if self.sizes[index].is_none() {
            let handle = &mut self.volumes[index];
            let len = self.adapter.seek(handle, 0, Whence::End)?;
            self.adapter.seek(handle, 0, Whence::Set)?;
            self.sizes[index] = Some(len);
        }
        if index + 1 < self.volumes.len() && self.starts[index + 1].is_none() {
            self.starts[index + 1] = self.starts[index].zip(self.sizes[index]).map(|(s, l)| s + l);
        }
        Ok(())
    }

    fn switch_to(&mut self, index: usize) -> io::Result<()> {
        if index == self.current {
            return Ok(());
        }
        let (from, to) = if self.current < index {
            let (head, tail) = self.volumes.split_at_mut(index);
            (&mut head[self.current], &mut tail[0])
        } else {
            let (head, tail) = self.volumes.split_at_mut(self.current);
            (&mut tail[0], &mut head[index])
        };
        debug!(from = %from.path(), to = %to.path(), "switching volume");
        if let Err(e) = self.adapter.switch(from, to) {
            warn!(path = %to.path(), "cannot open volume: {e}");
            self.failed = true;
            return Err(missing_volume());
        }
        self.current = index;
        self.window = 0..0;
        self.measure(index)
    }

    fn total_len(&mut self) -> io::Result<u64> {
        let last = self.volumes.len() - 1;
        for index in 0..=last {
            if self.sizes[index].is_none() {
                self.switch_to(index)?;
            }
        }
        Ok(self.starts[last].unwrap_or(0) + self.sizes[last].unwrap_or(0))
    }
}

impl Read for VolumeChain {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.failed {
            return Err(missing_volume());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.window.is_empty() {
                let data = &self.volumes[self.current].data()[self.window.clone()];
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                self.window.start += n;
                self.pos += n as u64;
                return Ok(n);
            }

            let n = self.adapter.read(&mut self.volumes[self.current])?.len();
            if n > 0 {
                self.window = 0..n;
                continue;
            }

            let next = self.current + 1;
            if next >= self.volumes.len() {
                return Ok(0);
            }
            let start = self.starts[self.current].unwrap_or(0);
            self.sizes[self.current] = Some(self.pos - start);
            self.starts[next] = Some(self.pos);
            self.switch_to(next)?;
        }
    }
}

impl Seek for VolumeChain {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if self.failed {
            return Err(missing_volume());
        }
        let invalid = || io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream");
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta).ok_or_else(invalid)?,
            SeekFrom::End(delta) => self.total_len()?.checked_add_signed(delta).ok_or_else(invalid)?,
        };

        let last = self.volumes.len() - 1;
        let mut index = 0;
        loop {
            if self.sizes[index].is_none() {
                self.switch_to(index)?;
            }
            let start = self.starts[index].unwrap_or(0);
            let size = self.sizes[index].unwrap_or(0);
            if target < start + size || index == last {
                break;
            }
            index += 1;
        }

        self.switch_to(index)?;
        let start = self.starts[index].unwrap_or(0);
        let local = i64::try_from(target - start).map_err(|_| invalid())?;
        self.adapter.seek(&mut self.volumes[index], local, Whence::Set)?;
        self.window = 0..0;
        self.pos = target;
        Ok(target)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}

impl Drop for VolumeChain {
    fn drop(&mut self) {
        for handle in &mut self.volumes {
            self.adapter.close(handle);
        }
    }
}
