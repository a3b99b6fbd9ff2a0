use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read};

use crate::engine::dos_to_unix;
use crate::error::{EngineError, messages};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Central Directory File Header, End of Central Directory and their ZIP64
/// counterparts; any of them ends the run of local entries.
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const EOCD_SIGNATURE: &[u8] = b"PK\x05\x06";
pub const ZIP64_EOCD_SIGNATURE: &[u8] = b"PK\x06\x06";
pub const ZIP64_LOCATOR_SIGNATURE: &[u8] = b"PK\x06\x07";

/// Data descriptor, also used as the split-archive marker at offset 0
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4B50;
pub const SPANNING_SIGNATURE: &[u8] = b"PK\x07\x08";
pub const TEMP_SPANNING_SIGNATURE: &[u8] = b"PK00";

const FLAG_ENCRYPTED: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

const EXTRA_ZIP64: u16 = 0x0001;
const EXTRA_EXTENDED_TIMESTAMP: u16 = 0x5455;

/// Parsed Local File Header
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub file_name: String,
    /// Whether sizes came from a ZIP64 extra field
    pub zip64: bool,
    /// Modification time from the extended-timestamp extra field
    pub unix_mtime: Option<i64>,
}

impl LocalFileHeader {
    /// Parse the header fields following the 4-byte signature.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EngineError> {
        let mut fixed = [0u8; LFH_SIZE - 4];
        reader.read_exact(&mut fixed)?;
        let mut cursor = Cursor::new(&fixed[..]);

        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;

        // Read the variable-length file name
        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        reader.read_exact(&mut file_name_bytes)?;
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

        let mut extra = vec![0u8; extra_field_length as usize];
        reader.read_exact(&mut extra)?;

        let mut header = Self {
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            file_name,
            zip64: false,
            unix_mtime: None,
        };
        header.apply_extra(&extra)?;
        Ok(header)
    }

    fn apply_extra(&mut self, extra: &[u8]) -> Result<(), EngineError> {
        let mut cursor = Cursor::new(extra);
        let end = extra.len() as u64;

        while cursor.position() + 4 <= end {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()? as u64;
            let field_end = cursor.position() + field_size;
            if field_end > end {
                break;
            }

            match header_id {
                EXTRA_ZIP64 => {
                    // Fields are present only if corresponding header field is 0xFFFFFFFF
                    if self.uncompressed_size == 0xFFFFFFFF {
                        if cursor.position() + 8 > field_end {
                            return Err(EngineError::fatal(messages::BAD_ZIP64));
                        }
                        self.uncompressed_size = cursor.read_u64::<LittleEndian>()?;
                        self.zip64 = true;
                    }
                    if self.compressed_size == 0xFFFFFFFF {
                        if cursor.position() + 8 > field_end {
                            return Err(EngineError::fatal(messages::BAD_ZIP64));
                        }
                        self.compressed_size = cursor.read_u64::<LittleEndian>()?;
                        self.zip64 = true;
                    }
                    if field_size >= 16 {
                        self.zip64 = true;
                    }
                }
                EXTRA_EXTENDED_TIMESTAMP if field_size >= 5 => {
                    let flags = cursor.read_u8()?;
                    if flags & 1 != 0 {
                        self.unix_mtime = Some(cursor.read_i32::<LittleEndian>()? as i64);
                    }
                }
                _ => {}
            }
            cursor.set_position(field_end);
        }

        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Modification time in seconds since the Unix epoch.
    ///
    /// Prefers the extended-timestamp field; DOS timestamps are taken as UTC.
    pub fn mtime(&self) -> i64 {
        self.unix_mtime
            .unwrap_or_else(|| dos_to_unix(self.last_mod_date, self.last_mod_time))
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self, EngineError> {
        if data.len() < Self::SIZE || &data[0..4] != EOCD_SIGNATURE {
            return Err(EngineError::fatal(messages::BAD_CENTRAL_DIRECTORY));
        }
        let mut cursor = Cursor::new(&data[8..]);
        Ok(Self {
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub const ZIP64_LOCATOR_SIZE: usize = 20;

/// Offset of the ZIP64 EOCD record named by a locator.
pub fn zip64_eocd_offset(locator: &[u8]) -> Result<u64, EngineError> {
    if locator.len() < ZIP64_LOCATOR_SIZE || &locator[0..4] != ZIP64_LOCATOR_SIGNATURE {
        return Err(EngineError::fatal(messages::BAD_ZIP64));
    }
    Ok(Cursor::new(&locator[8..16]).read_u64::<LittleEndian>()?)
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EndOfCentralDirectory {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self, EngineError> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != ZIP64_EOCD_SIGNATURE {
            return Err(EngineError::fatal(messages::BAD_ZIP64));
        }
        let mut cursor = Cursor::new(&data[32..]);
        Ok(Self {
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_MIN_SIZE: usize = 46;

/// What the central directory says about one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralRecord {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// Parse a whole central directory into records keyed by the offset of
/// their Local File Header.
pub fn parse_central_directory(data: &[u8]) -> Result<HashMap<u64, CentralRecord>, EngineError> {
    let mut records = HashMap::new();
    let mut cursor = Cursor::new(data);

    while (cursor.position() as usize) + CDFH_MIN_SIZE <= data.len() {
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            break;
        }

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let _flags = cursor.read_u16::<LittleEndian>()?;
        let _compression_method = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;
        let file_comment_length = cursor.read_u16::<LittleEndian>()? as u64;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        let extra_start = cursor.position() + file_name_length;
        let extra_end = extra_start + extra_field_length;
        let record_end = extra_end + file_comment_length;
        if record_end > data.len() as u64 {
            return Err(EngineError::fatal(messages::BAD_CENTRAL_DIRECTORY));
        }

        // ZIP64 values appear only for fields set to 0xFFFFFFFF, in this order
        cursor.set_position(extra_start);
        while cursor.position() + 4 <= extra_end {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()? as u64;
            let field_end = (cursor.position() + field_size).min(extra_end);
            if header_id == EXTRA_ZIP64 {
                if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    uncompressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    compressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                    lfh_offset = cursor.read_u64::<LittleEndian>()?;
                }
            }
            cursor.set_position(field_end);
        }
        cursor.set_position(record_end);

        records.insert(
            lfh_offset,
            CentralRecord {
                crc32,
                compressed_size,
                uncompressed_size,
            },
        );
    }

    Ok(records)
}
