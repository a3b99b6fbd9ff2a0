//! Forward-only ZIP engine.
//!
//! ## Parsing Strategy
//!
//! 0. Before the first entry, locate the End of Central Directory and load
//!    the central directory when the input can seek to its end; its sizes
//!    and CRCs override whatever a Local File Header deferred to a data
//!    descriptor
//! 1. Read a 4-byte signature
//! 2. For a Local File Header, parse it and position at the entry's data
//! 3. Reading the data either copies (STORED) or inflates (DEFLATE) it,
//!    verifying the CRC-32 once the last byte has been produced
//! 4. Skipping seeks past the compressed data when its size is known and
//!    inflates through it otherwise
//! 5. A Central Directory or End of Central Directory signature ends the walk

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::{Crc, Decompress, FlushDecompress, Status};
use std::collections::HashMap;
use std::io::{Seek, SeekFrom};
use tracing::debug;

use super::structures::*;
use crate::engine::{ArchiveInput, DecodingEngine, EntryMetadata, read_full, seek_target};
use crate::error::{EngineError, messages};
use crate::io::Whence;

/// Compressed bytes pulled from the input per refill.
const INPUT_CHUNK: usize = 16 * 1024;
const DISCARD_CHUNK: usize = 8192;
/// Maximum comment size in ZIP (65535 bytes)
const MAX_COMMENT_SIZE: u64 = 65535;
/// Central directories above this size are ignored rather than buffered.
const MAX_CENTRAL_DIRECTORY: u64 = 256 * 1024 * 1024;

/// Load the central directory, keyed by Local File Header offset.
///
/// `None` when the input has no usable End of Central Directory, which is
/// the case for truncated archives and streams cut before their end.
fn load_central_directory(
    input: &mut dyn ArchiveInput,
) -> Result<Option<HashMap<u64, CentralRecord>>, EngineError> {
    let size = input.seek(SeekFrom::End(0))?;
    if size < EndOfCentralDirectory::SIZE as u64 {
        return Ok(None);
    }

    let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(size);
    let search_start = size - search_size;
    let mut buf = vec![0u8; search_size as usize];
    input.seek(SeekFrom::Start(search_start))?;
    if read_full(&mut *input, &mut buf)? != buf.len() {
        return Ok(None);
    }

    // Search backwards; the comment length must account for every trailing byte
    let found = (0..=buf.len() - EndOfCentralDirectory::SIZE).rev().find(|&i| {
        &buf[i..i + 4] == EOCD_SIGNATURE && {
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            comment_len == buf.len() - i - EndOfCentralDirectory::SIZE
        }
    });
    let Some(i) = found else {
        return Ok(None);
    };
    let eocd_offset = search_start + i as u64;
    let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;

    let (cd_offset, cd_size, cd_limit) = if eocd.is_zip64() {
        let Some(locator_offset) = eocd_offset.checked_sub(ZIP64_LOCATOR_SIZE as u64) else {
            return Err(EngineError::fatal(messages::BAD_ZIP64));
        };
        let mut locator = [0u8; ZIP64_LOCATOR_SIZE];
        input.seek(SeekFrom::Start(locator_offset))?;
        input.read_exact(&mut locator)?;
        let zip64_offset = zip64_eocd_offset(&locator)?;
        if zip64_offset >= locator_offset {
            return Err(EngineError::fatal(messages::BAD_ZIP64));
        }
        let mut record = [0u8; Zip64EndOfCentralDirectory::MIN_SIZE];
        input.seek(SeekFrom::Start(zip64_offset))?;
        input.read_exact(&mut record)?;
        let zip64 = Zip64EndOfCentralDirectory::from_bytes(&record)?;
        debug!(entries = zip64.total_entries, "ZIP64 end of central directory");
        (zip64.cd_offset, zip64.cd_size, zip64_offset)
    } else {
        (eocd.cd_offset as u64, eocd.cd_size as u64, eocd_offset)
    };

    match cd_offset.checked_add(cd_size) {
        Some(end) if end <= cd_limit && cd_size <= MAX_CENTRAL_DIRECTORY => {}
        _ => return Err(EngineError::fatal(messages::BAD_CENTRAL_DIRECTORY)),
    }

    let mut data = vec![0u8; cd_size as usize];
    input.seek(SeekFrom::Start(cd_offset))?;
    input.read_exact(&mut data)?;
    let records = parse_central_directory(&data)?;
    debug!(
        entries = records.len(),
        expected = eocd.total_entries,
        comment_len = eocd.comment_len,
        "Loaded central directory"
    );
    Ok(Some(records))
}

/// Streaming ZIP decoder over any [`ArchiveInput`].
pub struct ZipEngine {
    input: Box<dyn ArchiveInput>,
    entry: Option<ZipEntry>,
    /// Central directory records; `None` when unavailable or not yet loaded.
    central: Option<HashMap<u64, CentralRecord>>,
    finished: bool,
    at_start: bool,
}

impl ZipEngine {
    pub fn new(input: Box<dyn ArchiveInput>) -> Self {
        Self {
            input,
            entry: None,
            central: None,
            finished: false,
            at_start: true,
        }
    }

    fn current(&mut self) -> Result<(&mut ZipEntry, &mut dyn ArchiveInput), EngineError> {
        match self.entry.as_mut() {
            Some(entry) => Ok((entry, &mut *self.input)),
            None => Err(EngineError::failed("No current entry")),
        }
    }
}

impl DecodingEngine for ZipEngine {
    fn format_name(&self) -> &'static str {
        "zip"
    }

    fn next_entry(&mut self) -> Result<Option<EntryMetadata>, EngineError> {
        if self.entry.as_ref().is_some_and(|e| !e.consumed) {
            self.skip_data()?;
        }
        self.entry = None;

        if self.at_start && !self.finished {
            let origin = self.input.stream_position()?;
            self.central = match load_central_directory(&mut *self.input) {
                Ok(records) => records,
                Err(e) => {
                    debug!(error = %e, "Central directory unusable, walking local headers only");
                    None
                }
            };
            self.input.seek(SeekFrom::Start(origin))?;
        }

        let mut header_offset;
        loop {
            if self.finished {
                return Ok(None);
            }

            header_offset = self.input.stream_position()?;
            let mut sig = [0u8; 4];
            match read_full(&mut *self.input, &mut sig)? {
                0 => {
                    self.finished = true;
                    return Err(EngineError::warn(messages::PREMATURE_END));
                }
                4 => {}
                _ => {
                    self.finished = true;
                    return Err(EngineError::fatal(messages::TRUNCATED));
                }
            }

            let first = std::mem::take(&mut self.at_start);
            match &sig[..] {
                s if s == LFH_SIGNATURE => break,
                s if first && (s == SPANNING_SIGNATURE || s == TEMP_SPANNING_SIGNATURE) => continue,
                s if s == CDFH_SIGNATURE
                    || s == EOCD_SIGNATURE
                    || s == ZIP64_EOCD_SIGNATURE
                    || s == ZIP64_LOCATOR_SIGNATURE =>
                {
                    self.finished = true;
                    return Ok(None);
                }
                _ => {
                    self.finished = true;
                    return Err(EngineError::fatal(messages::BAD_SIGNATURE));
                }
            }
        }

        let header = LocalFileHeader::read_from(&mut *self.input)?;
        let data_start = self.input.stream_position()?;

        let descriptor = header.has_data_descriptor();
        let central = self
            .central
            .as_ref()
            .and_then(|records| records.get(&header_offset))
            .copied();

        let (compressed_size, size, expected_crc) = match central {
            Some(record) => (
                Some(record.compressed_size),
                Some(record.uncompressed_size),
                Some(record.crc32),
            ),
            None if descriptor && header.compressed_size == 0 => {
                match header.compression_method {
                    CompressionMethod::Deflate if !header.is_encrypted() => {}
                    CompressionMethod::Deflate => {
                        return Err(EngineError::fatal(messages::NO_ENCRYPTION));
                    }
                    // Without the central directory nothing bounds raw data
                    CompressionMethod::Stored | CompressionMethod::Unknown(_) => {
                        return Err(EngineError::fatal(messages::UNSUPPORTED_COMPRESSION));
                    }
                }
                let size = (header.uncompressed_size != 0).then_some(header.uncompressed_size);
                (None, size, None)
            }
            None => (
                Some(header.compressed_size),
                (!descriptor || header.uncompressed_size != 0).then_some(header.uncompressed_size),
                (!descriptor).then_some(header.crc32),
            ),
        };

        let metadata = EntryMetadata {
            path: header.file_name.clone(),
            size: size.unwrap_or(0),
            mtime: header.mtime(),
        };

        let inflater = match header.compression_method {
            CompressionMethod::Deflate => Some(Inflater::new()),
            _ => None,
        };

        self.entry = Some(ZipEntry {
            data_start,
            compressed_size,
            size,
            expected_crc,
            header,
            pos: 0,
            crc: Crc::new(),
            crc_valid: true,
            inflater,
            consumed: false,
        });

        Ok(Some(metadata))
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let (entry, input) = self.current()?;
        if buf.is_empty() || entry.consumed {
            return Ok(0);
        }
        if entry.header.is_encrypted() {
            return Err(EngineError::failed(messages::ENCRYPTED_ENTRY));
        }

        let n = match entry.header.compression_method {
            CompressionMethod::Stored => entry.read_stored(input, buf)?,
            CompressionMethod::Deflate => entry.inflate(input, buf)?,
            CompressionMethod::Unknown(_) => {
                return Err(EngineError::failed(messages::UNSUPPORTED_COMPRESSION));
            }
        };

        if n == 0 {
            entry.finish(input, true)?;
            return Ok(0);
        }
        entry.crc.update(&buf[..n]);
        entry.pos += n as u64;
        Ok(n)
    }

    fn skip_data(&mut self) -> Result<(), EngineError> {
        let (entry, input) = self.current()?;
        if entry.consumed {
            return Ok(());
        }
        if entry.compressed_size.is_none() {
            let mut scratch = [0u8; DISCARD_CHUNK];
            while entry.inflate(input, &mut scratch)? > 0 {}
        }
        entry.finish(input, false)
    }

    fn seek_data(&mut self, offset: i64, whence: Whence) -> Result<u64, EngineError> {
        let (entry, input) = self.current()?;
        if entry.header.is_encrypted() {
            return Err(EngineError::failed(messages::SEEK_UNSUPPORTED));
        }
        let target = seek_target(offset, whence, entry.pos, entry.size)?;

        match entry.header.compression_method {
            CompressionMethod::Stored => {
                input.seek(SeekFrom::Start(entry.data_start + target))?;
                entry.pos = target;
            }
            CompressionMethod::Deflate => {
                if target < entry.pos || entry.consumed {
                    input.seek(SeekFrom::Start(entry.data_start))?;
                    entry.inflater = Some(Inflater::new());
                    entry.pos = 0;
                }
                let mut scratch = [0u8; DISCARD_CHUNK];
                while entry.pos < target {
                    let want = (target - entry.pos).min(DISCARD_CHUNK as u64) as usize;
                    let n = entry.inflate(input, &mut scratch[..want])?;
                    if n == 0 {
                        break;
                    }
                    entry.pos += n as u64;
                }
            }
            CompressionMethod::Unknown(_) => {
                return Err(EngineError::failed(messages::SEEK_UNSUPPORTED));
            }
        }

        entry.consumed = false;
        entry.crc_valid = false;
        Ok(entry.pos)
    }
}

struct ZipEntry {
    header: LocalFileHeader,
    data_start: u64,
    /// Unknown until the deflate stream ends when only a data descriptor
    /// carries it.
    compressed_size: Option<u64>,
    size: Option<u64>,
    expected_crc: Option<u32>,
    pos: u64,
    crc: Crc,
    /// Cleared by any seek; a CRC over a partial read means nothing.
    crc_valid: bool,
    inflater: Option<Inflater>,
    /// Data and descriptor fully read; the input sits at the next header.
    consumed: bool,
}

impl ZipEntry {
    fn read_stored(&mut self, input: &mut dyn ArchiveInput, buf: &mut [u8]) -> Result<usize, EngineError> {
        let size = self.compressed_size.unwrap_or(0);
        let remaining = size.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let want = remaining.min(buf.len() as u64) as usize;
        let n = input.read(&mut buf[..want])?;
        if n == 0 {
            return Err(EngineError::fatal(messages::TRUNCATED));
        }
        Ok(n)
    }

    fn inflate(&mut self, input: &mut dyn ArchiveInput, buf: &mut [u8]) -> Result<usize, EngineError> {
        let compressed_size = self.compressed_size;
        let Some(inflater) = self.inflater.as_mut() else {
            return Err(EngineError::failed(messages::DECOMPRESSION_FAILED));
        };
        inflater.inflate(input, compressed_size, buf)
    }

    /// Position the input after the entry, reading its data descriptor.
    fn finish(&mut self, input: &mut dyn ArchiveInput, verify: bool) -> Result<(), EngineError> {
        let compressed = match self.compressed_size {
            Some(size) => size,
            None => self
                .inflater
                .as_ref()
                .map(|inflater| inflater.decompress.total_in())
                .unwrap_or(0),
        };
        input.seek(SeekFrom::Start(self.data_start + compressed))?;

        if self.header.has_data_descriptor() {
            let mut crc = input.read_u32::<LittleEndian>()?;
            if crc == DATA_DESCRIPTOR_SIGNATURE {
                crc = input.read_u32::<LittleEndian>()?;
            }
            let (_, uncompressed) = if self.header.zip64 {
                (input.read_u64::<LittleEndian>()?, input.read_u64::<LittleEndian>()?)
            } else {
                (
                    input.read_u32::<LittleEndian>()? as u64,
                    input.read_u32::<LittleEndian>()? as u64,
                )
            };
            self.expected_crc.get_or_insert(crc);
            self.size.get_or_insert(uncompressed);
        }

        self.consumed = true;
        if verify && self.crc_valid {
            if let Some(expected) = self.expected_crc {
                if self.crc.sum() != expected {
                    return Err(EngineError::warn(messages::CRC_MISMATCH));
                }
            }
        }
        Ok(())
    }
}

/// Raw-deflate state with its own compressed-input buffer.
struct Inflater {
    decompress: Decompress,
    input: Vec<u8>,
    start: usize,
    end: usize,
    pulled: u64,
    done: bool,
}

impl Inflater {
    fn new() -> Self {
        Self {
            decompress: Decompress::new(false),
            input: vec![0; INPUT_CHUNK],
            start: 0,
            end: 0,
            pulled: 0,
            done: false,
        }
    }

    fn inflate(
        &mut self,
        input: &mut dyn ArchiveInput,
        compressed_size: Option<u64>,
        buf: &mut [u8],
    ) -> Result<usize, EngineError> {
        loop {
            if self.done {
                return Ok(0);
            }

            let mut exhausted = false;
            if self.start == self.end {
                let limit = match compressed_size {
                    Some(size) => size.saturating_sub(self.pulled).min(INPUT_CHUNK as u64) as usize,
                    None => INPUT_CHUNK,
                };
                let n = if limit > 0 { input.read(&mut self.input[..limit])? } else { 0 };
                self.start = 0;
                self.end = n;
                self.pulled += n as u64;
                exhausted = n == 0;
            }

            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress(&self.input[self.start..self.end], buf, FlushDecompress::None)
                .map_err(|_| EngineError::fatal(messages::DECOMPRESSION_FAILED))?;
            let used = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            self.start += used;

            if status == Status::StreamEnd {
                self.done = true;
            }
            if produced > 0 {
                return Ok(produced);
            }
            if self.done {
                return Ok(0);
            }
            if used == 0 {
                return Err(EngineError::fatal(if exhausted {
                    messages::TRUNCATED
                } else {
                    messages::DECOMPRESSION_FAILED
                }));
            }
        }
    }
}
