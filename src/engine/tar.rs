//! TAR decoding on top of the `tar` crate.
//!
//! The crate parses headers (ustar, GNU long names, PAX records); this engine
//! only remembers where each entry's data lives so reads and seeks can go
//! straight to the input. A short-lived [`tar::Archive`] is built for every
//! header, starting at the offset the previous entry ended at.

use std::io::{self, Cursor, Seek, SeekFrom};

use tracing::debug;

use super::{ArchiveInput, DecodingEngine, EntryMetadata, seek_target};
use crate::error::{EngineError, messages};
use crate::io::Whence;

/// TAR block size.
const BLOCK_SIZE: u64 = 512;

/// Whether `head` starts with a TAR header block.
pub(super) fn is_tar(head: &[u8]) -> bool {
    if head.len() < BLOCK_SIZE as usize {
        return false;
    }
    if &head[257..262] == b"ustar" {
        return true;
    }
    // v7 headers carry no magic; a valid checksum is the only tell
    let mut archive = tar::Archive::new(Cursor::new(head));
    matches!(archive.entries().ok().and_then(|mut e| e.next()), Some(Ok(_)))
}

fn padded(size: u64) -> Option<u64> {
    Some(size.checked_add(BLOCK_SIZE - 1)? / BLOCK_SIZE * BLOCK_SIZE)
}

/// Map a header error from the `tar` crate onto the engine's vocabulary.
fn header_error(e: io::Error) -> EngineError {
    match e.kind() {
        io::ErrorKind::Other | io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {}
        _ => return EngineError::from(e),
    }
    let text = e.to_string();
    debug!(error = %text, "tar header rejected");
    let message = if text.contains("checksum") {
        messages::BAD_CHECKSUM
    } else if text.contains("entire block") {
        messages::TRUNCATED
    } else if text.contains("numeric field") {
        messages::BAD_OCTAL
    } else {
        messages::DAMAGED
    };
    EngineError::fatal(message)
}

/// PAX `mtime` record, whole seconds.
fn pax_mtime<R: io::Read>(entry: &mut tar::Entry<'_, R>) -> Option<i64> {
    let extensions = entry.pax_extensions().ok()??;
    for extension in extensions.flatten() {
        if extension.key() == Ok("mtime") {
            let value = extension.value().ok()?;
            return value.split('.').next()?.parse().ok();
        }
    }
    None
}

/// Streaming TAR decoder.
pub struct TarEngine {
    input: Box<dyn ArchiveInput>,
    /// Offset of the next header block.
    next_header: u64,
    entry: Option<TarEntry>,
    finished: bool,
}

enum Header {
    Entry(EntryMetadata),
    /// PAX global record; applies to no single entry.
    Global,
    End,
}

struct TarEntry {
    data_start: u64,
    size: u64,
    pos: u64,
}

impl TarEngine {
    pub fn new(input: Box<dyn ArchiveInput>) -> Self {
        Self {
            input,
            next_header: 0,
            entry: None,
            finished: false,
        }
    }

    /// Parse the header at `next_header` and advance past the entry's data.
    fn read_header(&mut self) -> Result<Header, EngineError> {
        let base = self.next_header;
        self.input.seek(SeekFrom::Start(base))?;

        let mut archive = tar::Archive::new(&mut *self.input);
        let mut entries = archive.entries_with_seek().map_err(header_error)?;
        let mut entry = match entries.next() {
            Some(entry) => entry.map_err(header_error)?,
            None => return Ok(Header::End),
        };

        let header = entry.header();
        let kind = header.entry_type();
        let on_disk = header.entry_size().map_err(header_error)?;
        let data_start = base
            .checked_add(entry.raw_file_position())
            .ok_or_else(|| EngineError::fatal(messages::SIZE_OVERFLOW))?;
        self.next_header = padded(on_disk)
            .and_then(|len| data_start.checked_add(len))
            .ok_or_else(|| EngineError::fatal(messages::SIZE_OVERFLOW))?;

        if kind.is_pax_global_extensions() {
            return Ok(Header::Global);
        }

        let mut path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let header_mtime = entry.header().mtime().map_err(header_error)? as i64;
        let mtime = pax_mtime(&mut entry).unwrap_or(header_mtime);
        let size = if kind.is_file() || kind.is_contiguous() || kind.is_gnu_sparse() {
            entry.size()
        } else {
            0
        };
        if kind.is_dir() && !path.ends_with('/') {
            path.push('/');
        }

        self.entry = Some(TarEntry {
            data_start,
            size,
            pos: 0,
        });
        Ok(Header::Entry(EntryMetadata { path, size, mtime }))
    }
}

impl DecodingEngine for TarEngine {
    fn format_name(&self) -> &'static str {
        "tar"
    }

    fn next_entry(&mut self) -> Result<Option<EntryMetadata>, EngineError> {
        self.entry = None;
        loop {
            if self.finished {
                return Ok(None);
            }
            match self.read_header() {
                Ok(Header::Global) => continue,
                Ok(Header::Entry(metadata)) => {
                    if let Some(entry) = &self.entry {
                        self.input.seek(SeekFrom::Start(entry.data_start))?;
                    }
                    return Ok(Some(metadata));
                }
                Ok(Header::End) => {
                    self.finished = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.finished = !e.is_retry();
                    return Err(e);
                }
            }
        }
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let Some(entry) = self.entry.as_mut() else {
            return Err(EngineError::failed("No current entry"));
        };
        let remaining = entry.size - entry.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = remaining.min(buf.len() as u64) as usize;
        let n = self.input.read(&mut buf[..want])?;
        if n == 0 {
            return Err(EngineError::fatal(messages::TRUNCATED));
        }
        entry.pos += n as u64;
        Ok(n)
    }

    fn skip_data(&mut self) -> Result<(), EngineError> {
        // The next header offset is already known
        self.entry = None;
        Ok(())
    }

    fn seek_data(&mut self, offset: i64, whence: Whence) -> Result<u64, EngineError> {
        let Some(entry) = self.entry.as_mut() else {
            return Err(EngineError::failed("No current entry"));
        };
        let target = seek_target(offset, whence, entry.pos, Some(entry.size))?;
        self.input.seek(SeekFrom::Start(entry.data_start + target))?;
        entry.pos = target;
        Ok(target)
    }
}
