//! Streaming ZIP decoding.
//!
//! The engine walks the archive front to back, one Local File Header at a
//! time, so entries come out in archive order across a volume chain. When
//! the input reaches its End of Central Directory record, the central
//! directory is loaded first and supplies the sizes and CRCs that local
//! headers leave to a trailing data descriptor.
//!
//! ## Architecture
//!
//! - [`structures`]: header and directory record layouts, compression methods, timestamps
//! - [`reader`]: the [`ZipEngine`] state machine
//!
//! ## ZIP Stream Layout
//!
//! A ZIP file consists of:
//! 1. Local file headers, each followed by the entry's compressed data and,
//!    when flag bit 3 is set, a data descriptor
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reaching the Central Directory ends iteration.
//!
//! ## Supported Features
//!
//! - STORED and DEFLATE entries
//! - ZIP64 and extended-timestamp extra fields
//! - Data descriptors after STORED and DEFLATE entries
//! - CRC-32 verification when an entry is read to the end
//!
//! ## Limitations
//!
//! - Encrypted entries are listed but cannot be read
//! - Without a reachable central directory, STORED entries whose sizes only
//!   appear in a data descriptor cannot be delimited and stop iteration

mod reader;
mod structures;

pub use reader::ZipEngine;
pub use structures::*;

/// Whether `head` starts like a ZIP archive.
pub(super) fn is_zip(head: &[u8]) -> bool {
    head.starts_with(LFH_SIGNATURE)
        || head.starts_with(EOCD_SIGNATURE)
        || head.starts_with(SPANNING_SIGNATURE)
        || head.starts_with(TEMP_SPANNING_SIGNATURE)
}
