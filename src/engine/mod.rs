//! Archive decoding engines.
//!
//! An engine is a pull-based, forward-only iterator over the entries of one
//! logical archive stream. It is driven through the [`DecodingEngine`]
//! trait: fetch the next header, then read, seek or skip that entry's data
//! before asking for the next one.
//!
//! ## Detection
//!
//! [`open_volumes`] and [`open`] peek at the first block of the input:
//!
//! 1. A gzip signature wraps the input in a [`GzipFilter`] and peeks again.
//!    Other compressor signatures are rejected.
//! 2. RAR, 7z, ZIP and TAR signatures select [`RarEngine`],
//!    [`SevenZipEngine`], [`ZipEngine`] or [`TarEngine`].
//!
//! Anything else fails with "Unrecognized archive format".
//!
//! ## Engines
//!
//! | Format | Backend | Input |
//! |---|---|---|
//! | ZIP | built in, `flate2` | streamed from the volume chain |
//! | TAR | `tar` | streamed from the volume chain |
//! | 7z | `zesven` | streamed from the volume chain |
//! | RAR | `unrar` | volume files on disk, spooled when remote |

mod filter;
mod rar;
mod sevenz;
mod tar;
mod zip;

pub use filter::GzipFilter;
pub use rar::RarEngine;
pub use sevenz::SevenZipEngine;
pub use self::tar::TarEngine;
pub use zip::{CompressionMethod, LocalFileHeader, ZipEngine};

use std::io::{self, Read, Seek, SeekFrom};

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{EngineError, messages};
use crate::io::Whence;
use crate::source::VolumeChain;

/// Byte input an engine pulls from.
pub trait ArchiveInput: Read + Seek + Send {}

impl<T: Read + Seek + Send> ArchiveInput for T {}

/// Metadata of the entry an engine is positioned at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Slash-delimited path; directory records end with `/`.
    pub path: String,
    /// Declared uncompressed size.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
}

impl EntryMetadata {
    pub fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// The entry-iteration surface every decoding engine provides.
pub trait DecodingEngine: Send {
    /// Short format name for diagnostics.
    fn format_name(&self) -> &'static str;

    /// Advance to the next entry header, skipping any unread data of the
    /// current entry. `Ok(None)` marks the normal end of the archive.
    fn next_entry(&mut self) -> Result<Option<EntryMetadata>, EngineError>;

    /// Read decoded data of the current entry. Zero means end of entry.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, EngineError>;

    /// Discard the rest of the current entry's data.
    fn skip_data(&mut self) -> Result<(), EngineError>;

    /// Reposition within the current entry's decoded data.
    fn seek_data(&mut self, offset: i64, whence: Whence) -> Result<u64, EngineError>;
}

/// Enough for the ustar magic at offset 257.
const PEEK_SIZE: usize = 512;

const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const RAR_MAGIC: &[u8] = b"Rar!\x1A\x07";
const SEVEN_ZIP_MAGIC: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
const UNSUPPORTED_FILTERS: &[&[u8]] = &[
    b"BZh",
    &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00],
    &[0x28, 0xB5, 0x2F, 0xFD],
    &[0x04, 0x22, 0x4D, 0x18],
];

/// Detect the format of the archive spread over `chain` and build the
/// matching engine.
///
/// RAR sets are handed to the RAR engine volume by volume; every other
/// format reads the chain as one stream.
pub fn open_volumes(mut chain: VolumeChain) -> Result<Box<dyn DecodingEngine>, EngineError> {
    let head = peek(&mut chain)?;
    if head.starts_with(RAR_MAGIC) {
        debug!(volumes = chain.volume_count(), "rar format detected");
        return Ok(Box::new(RarEngine::from_chain(chain)?));
    }
    open(chain)
}

/// Detect the filter and format of `input` and build the matching engine.
pub fn open<I: ArchiveInput + 'static>(input: I) -> Result<Box<dyn DecodingEngine>, EngineError> {
    let mut input: Box<dyn ArchiveInput> = Box::new(input);
    let mut head = peek(&mut *input)?;

    if head.starts_with(GZIP_MAGIC) {
        debug!("gzip filter detected");
        input = Box::new(GzipFilter::new(input));
        head = peek(&mut *input)?;
    } else if UNSUPPORTED_FILTERS.iter().any(|magic| head.starts_with(magic)) {
        return Err(EngineError::fatal(messages::UNRECOGNIZED_FILTER));
    }

    if zip::is_zip(&head) {
        debug!("zip format detected");
        Ok(Box::new(ZipEngine::new(input)))
    } else if head.starts_with(SEVEN_ZIP_MAGIC) {
        debug!("7z format detected");
        Ok(Box::new(SevenZipEngine::new(input)?))
    } else if head.starts_with(RAR_MAGIC) {
        debug!("rar format detected");
        Ok(Box::new(RarEngine::from_input(&mut *input)?))
    } else if self::tar::is_tar(&head) {
        debug!("tar format detected");
        Ok(Box::new(TarEngine::new(input)))
    } else {
        Err(EngineError::fatal(messages::UNRECOGNIZED_FORMAT))
    }
}

fn peek<R: Read + Seek + ?Sized>(input: &mut R) -> io::Result<Vec<u8>> {
    let mut head = vec![0u8; PEEK_SIZE];
    let n = read_full(input, &mut head)?;
    head.truncate(n);
    input.seek(SeekFrom::Start(0))?;
    Ok(head)
}

/// Fill `buf` as far as the input allows; returns the bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Resolve `offset` against `whence` for an entry of `size` bytes positioned
/// at `pos`. Targets outside `0..=size` are rejected.
pub(crate) fn seek_target(
    offset: i64,
    whence: Whence,
    pos: u64,
    size: Option<u64>,
) -> Result<u64, EngineError> {
    let base = match whence {
        Whence::Set => 0,
        Whence::Current => pos,
        Whence::End => size.ok_or_else(|| EngineError::failed(messages::SEEK_UNSUPPORTED))?,
    };
    let target = base
        .checked_add_signed(offset)
        .ok_or_else(|| EngineError::failed(messages::SEEK_UNSUPPORTED))?;
    match size {
        Some(size) if target > size => Err(EngineError::failed(messages::SEEK_UNSUPPORTED)),
        _ => Ok(target),
    }
}

/// MS-DOS date and time fields as seconds since the Unix epoch, read as UTC.
/// Invalid dates map to 0.
pub(crate) fn dos_to_unix(date: u16, time: u16) -> i64 {
    let year = 1980 + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0F);
    let day = u32::from(date & 0x1F);
    let hour = u32::from(time >> 11);
    let minute = u32::from((time >> 5) & 0x3F);
    let second = u32::from(time & 0x1F) * 2;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .map(|stamp| stamp.and_utc().timestamp())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn dos_timestamps() {
        // 2024-05-17 13:45:30
        let time = (13 << 11) | (45 << 5) | 15;
        let date = ((2024 - 1980) << 9) | (5 << 5) | 17;
        assert_eq!(dos_to_unix(date, time), 1_715_953_530);
        assert_eq!(dos_to_unix((1 << 5) | 1, 0), 315_532_800);
        // Month 0 does not exist.
        assert_eq!(dos_to_unix(1, 0), 0);
    }

    #[test]
    fn seek_targets_are_bounded() {
        assert_eq!(seek_target(3, Whence::Set, 0, Some(10)).unwrap(), 3);
        assert_eq!(seek_target(-2, Whence::End, 0, Some(10)).unwrap(), 8);
        assert_eq!(seek_target(1, Whence::Current, 4, Some(10)).unwrap(), 5);
        assert!(seek_target(11, Whence::Set, 0, Some(10)).is_err());
        assert!(seek_target(-5, Whence::Current, 4, Some(10)).is_err());
        assert!(seek_target(0, Whence::End, 0, None).is_err());
    }

    #[test]
    fn rejects_unknown_input() {
        let err = open(Cursor::new(b"just some text".to_vec())).err().unwrap();
        assert_eq!(err.message, messages::UNRECOGNIZED_FORMAT);

        let err = open(Cursor::new(b"BZh91AY&SY".to_vec())).err().unwrap();
        assert_eq!(err.message, messages::UNRECOGNIZED_FILTER);
    }
}
