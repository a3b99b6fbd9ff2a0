//! 7z decoding backed by `zesven`.
//!
//! 7z keeps its header at the end of the archive and compresses entries in
//! solid blocks, so there is no useful streaming position: the header is
//! read at open and each entry is decompressed whole the first time its data
//! is touched.

use std::io::{Cursor, Read, Seek, SeekFrom};

use tracing::debug;

use super::{ArchiveInput, DecodingEngine, EntryMetadata, seek_target};
use crate::error::{EngineError, messages};
use crate::io::Whence;

fn archive_error(e: zesven::Error) -> EngineError {
    match e {
        zesven::Error::Io(e) => EngineError::from(e),
        zesven::Error::UnsupportedMethod { method_id } => {
            debug!(method_id, "7z coder not available");
            EngineError::failed(messages::UNSUPPORTED_COMPRESSION)
        }
        zesven::Error::CrcMismatch { .. } => EngineError::failed(messages::CRC_MISMATCH),
        e => {
            debug!(error = %e, "7z archive rejected");
            EngineError::fatal(messages::DAMAGED)
        }
    }
}

/// 7z decoder over any [`ArchiveInput`].
pub struct SevenZipEngine {
    archive: zesven::Archive<Box<dyn ArchiveInput>>,
    /// Index of the next entry to list.
    next: usize,
    current: Option<Current>,
}

struct Current {
    index: usize,
    size: u64,
    /// Decompressed on first read or seek.
    data: Option<Cursor<Vec<u8>>>,
}

impl SevenZipEngine {
    pub fn new(mut input: Box<dyn ArchiveInput>) -> Result<Self, EngineError> {
        input.seek(SeekFrom::Start(0))?;
        let archive = zesven::Archive::open(input).map_err(|e| {
            // Header problems make the whole archive unusable
            let err = archive_error(e);
            EngineError::fatal(err.message)
        })?;
        debug!(entries = archive.entries().len(), "Opened 7z archive");
        Ok(Self {
            archive,
            next: 0,
            current: None,
        })
    }

    fn data(&mut self) -> Result<&mut Cursor<Vec<u8>>, EngineError> {
        let Some(current) = self.current.as_mut() else {
            return Err(EngineError::failed("No current entry"));
        };
        if current.data.is_none() {
            let entry = &self.archive.entries()[current.index];
            if entry.is_encrypted {
                return Err(EngineError::failed(messages::ENCRYPTED_ENTRY));
            }
            let bytes = if entry.is_directory {
                Vec::new()
            } else {
                self.archive
                    .extract_entry_to_vec_by_index(current.index)
                    .map_err(archive_error)?
            };
            current.data = Some(Cursor::new(bytes));
        }
        current
            .data
            .as_mut()
            .ok_or_else(|| EngineError::failed(messages::DECOMPRESSION_FAILED))
    }
}

impl DecodingEngine for SevenZipEngine {
    fn format_name(&self) -> &'static str {
        "7z"
    }

    fn next_entry(&mut self) -> Result<Option<EntryMetadata>, EngineError> {
        self.current = None;
        let Some(entry) = self.archive.entries().get(self.next) else {
            return Ok(None);
        };
        let index = self.next;
        self.next += 1;

        let mut path = entry.path.as_str().to_string();
        let size = if entry.is_directory { 0 } else { entry.size };
        if entry.is_directory && !path.ends_with('/') {
            path.push('/');
        }
        let mtime = entry
            .modification_timestamp()
            .map(|t| t.as_unix_secs())
            .unwrap_or(0);

        self.current = Some(Current {
            index,
            size,
            data: None,
        });
        Ok(Some(EntryMetadata { path, size, mtime }))
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        if buf.is_empty() {
            return Ok(0);
        }
        Ok(self.data()?.read(buf)?)
    }

    fn skip_data(&mut self) -> Result<(), EngineError> {
        self.current = None;
        Ok(())
    }

    fn seek_data(&mut self, offset: i64, whence: Whence) -> Result<u64, EngineError> {
        let (pos, size) = match &self.current {
            Some(current) => (
                current.data.as_ref().map_or(0, |d| d.position()),
                current.size,
            ),
            None => return Err(EngineError::failed("No current entry")),
        };
        let target = seek_target(offset, whence, pos, Some(size))?;
        self.data()?.set_position(target);
        Ok(target)
    }
}
