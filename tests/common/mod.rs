//! Archive builders shared by the integration tests.
//!
//! Each integration test file compiles as its own crate and uses only some
//! of these helpers.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use archivefs::{ArchiveVfs, Config, MemoryProvider, Notifier, Severity};
use flate2::Compression;
use flate2::write::{DeflateEncoder, GzEncoder};

/// 2024-05-17 13:45:30 as DOS time and date.
pub const DOS_TIME: u16 = (13 << 11) | (45 << 5) | 15;
pub const DOS_DATE: u16 = ((2024 - 1980) << 9) | (5 << 5) | 17;
pub const MTIME: i64 = 1_715_953_530;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflate,
    /// DEFLATE with sizes and CRC in a trailing data descriptor.
    DeflateDescriptor,
    /// Raw bytes with sizes and CRC in a trailing data descriptor.
    StoredDescriptor,
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Writes ZIP archives the way common tools do: local headers and data, then
/// a central directory and its end record.
#[derive(Default)]
pub struct ZipBuilder {
    out: Vec<u8>,
    central: Vec<u8>,
    count: u16,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(self, name: &str) -> Self {
        assert!(name.ends_with('/'));
        self.file(name, b"", Method::Stored)
    }

    pub fn file(mut self, name: &str, data: &[u8], method: Method) -> Self {
        let crc = crc32(data);
        let payload = match method {
            Method::Stored | Method::StoredDescriptor => data.to_vec(),
            Method::Deflate | Method::DeflateDescriptor => deflate(data),
        };
        let (flags, code) = match method {
            Method::Stored => (0u16, 0u16),
            Method::Deflate => (0, 8),
            Method::DeflateDescriptor => (0x0008, 8),
            Method::StoredDescriptor => (0x0008, 0),
        };
        let descriptor = matches!(method, Method::DeflateDescriptor | Method::StoredDescriptor);
        let offset = self.out.len() as u32;

        let header_crc = if descriptor { 0 } else { crc };
        let header_csize = if descriptor { 0 } else { payload.len() as u32 };
        let header_usize = if descriptor { 0 } else { data.len() as u32 };

        let out = &mut self.out;
        out.extend_from_slice(b"PK\x03\x04");
        put16(out, 20);
        put16(out, flags);
        put16(out, code);
        put16(out, DOS_TIME);
        put16(out, DOS_DATE);
        put32(out, header_crc);
        put32(out, header_csize);
        put32(out, header_usize);
        put16(out, name.len() as u16);
        put16(out, 0);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&payload);
        if descriptor {
            out.extend_from_slice(b"PK\x07\x08");
            put32(out, crc);
            put32(out, payload.len() as u32);
            put32(out, data.len() as u32);
        }

        let cd = &mut self.central;
        cd.extend_from_slice(b"PK\x01\x02");
        put16(cd, 20);
        put16(cd, 20);
        put16(cd, flags);
        put16(cd, code);
        put16(cd, DOS_TIME);
        put16(cd, DOS_DATE);
        put32(cd, crc);
        put32(cd, payload.len() as u32);
        put32(cd, data.len() as u32);
        put16(cd, name.len() as u16);
        put16(cd, 0);
        put16(cd, 0);
        put16(cd, 0);
        put16(cd, 0);
        put32(cd, 0);
        put32(cd, offset);
        cd.extend_from_slice(name.as_bytes());

        self.count += 1;
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        let cd_offset = self.out.len() as u32;
        let cd_size = self.central.len() as u32;
        self.out.extend_from_slice(&self.central);
        self.out.extend_from_slice(b"PK\x05\x06");
        put16(&mut self.out, 0);
        put16(&mut self.out, 0);
        put16(&mut self.out, self.count);
        put16(&mut self.out, self.count);
        put32(&mut self.out, cd_size);
        put32(&mut self.out, cd_offset);
        put16(&mut self.out, 0);
        self.out
    }
}

/// Writes ustar archives.
#[derive(Default)]
pub struct TarBuilder {
    out: Vec<u8>,
}

impl TarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        if name.len() > 100 {
            let mut long = name.as_bytes().to_vec();
            long.push(0);
            self.push(b"././@LongLink", b'L', &long);
            self.push(&name.as_bytes()[..100], b'0', data);
        } else {
            self.push(name.as_bytes(), b'0', data);
        }
        self
    }

    pub fn dir(mut self, name: &str) -> Self {
        self.push(name.as_bytes(), b'5', b"");
        self
    }

    fn push(&mut self, name: &[u8], typeflag: u8, data: &[u8]) {
        let mut header = [0u8; 512];
        header[..name.len()].copy_from_slice(name);
        header[100..108].copy_from_slice(b"0000644\0");
        header[108..116].copy_from_slice(b"0001750\0");
        header[116..124].copy_from_slice(b"0001750\0");
        header[124..136].copy_from_slice(format!("{:011o}\0", data.len()).as_bytes());
        header[136..148].copy_from_slice(format!("{:011o}\0", MTIME).as_bytes());
        header[156] = typeflag;
        header[257..263].copy_from_slice(b"ustar\0");
        header[263..265].copy_from_slice(b"00");

        header[148..156].copy_from_slice(b"        ");
        let sum: u32 = header.iter().map(|&b| b as u32).sum();
        header[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());

        self.out.extend_from_slice(&header);
        self.out.extend_from_slice(data);
        let padding = (512 - data.len() % 512) % 512;
        self.out.extend(std::iter::repeat_n(0u8, padding));
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.out.extend(std::iter::repeat_n(0u8, 1024));
        self.out
    }
}

const RAR_MARKER: &[u8] = b"Rar!\x1A\x07\x00";

/// Writes RAR 4.x archives with STORED entries.
#[derive(Default)]
pub struct RarBuilder {
    files: Vec<(String, Vec<u8>)>,
}

impl RarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.files.push((name.to_string(), data.to_vec()));
        self
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = RAR_MARKER.to_vec();
        rar_main_header(&mut out, 0);
        for (name, data) in &self.files {
            rar_file_header(&mut out, name, data.len() as u32, data.len() as u32, 0, crc32(data));
            out.extend_from_slice(data);
        }
        rar_end(&mut out, 0);
        out
    }

    /// Every file in the first volume except the last, which is split
    /// evenly across `parts` volumes named `.partN.rar`.
    pub fn volumes(mut self, parts: usize) -> Vec<Vec<u8>> {
        let (last_name, last_data) = self.files.pop().unwrap();
        let pieces = split(&last_data, parts);
        let total = last_data.len() as u32;
        let mut volumes = Vec::new();

        for (i, piece) in pieces.iter().enumerate() {
            let first = i == 0;
            let last = i + 1 == pieces.len();
            let mut out = RAR_MARKER.to_vec();
            rar_main_header(&mut out, 0x0001 | 0x0010 | if first { 0x0100 } else { 0 });
            if first {
                for (name, data) in &self.files {
                    rar_file_header(&mut out, name, data.len() as u32, data.len() as u32, 0, crc32(data));
                    out.extend_from_slice(data);
                }
            }
            let flags = if first { 0 } else { 0x01 } | if last { 0 } else { 0x02 };
            let crc = if last { crc32(&last_data) } else { 0xFFFF_FFFF };
            // Packed size is this volume's share, unpacked size the whole file
            rar_file_header(&mut out, &last_name, piece.len() as u32, total, flags, crc);
            out.extend_from_slice(piece);
            rar_end(&mut out, if last { 0 } else { 0x0001 });
            volumes.push(out);
        }
        volumes
    }
}

fn rar_fix_crc(out: &mut [u8], start: usize) {
    let size = u16::from_le_bytes([out[start + 5], out[start + 6]]) as usize;
    let crc = (crc32(&out[start + 2..start + size]) & 0xFFFF) as u16;
    out[start..start + 2].copy_from_slice(&crc.to_le_bytes());
}

fn rar_main_header(out: &mut Vec<u8>, flags: u16) {
    let start = out.len();
    put16(out, 0);
    out.push(0x73);
    put16(out, flags);
    put16(out, 13);
    put16(out, 0);
    put32(out, 0);
    rar_fix_crc(out, start);
}

fn rar_file_header(out: &mut Vec<u8>, name: &str, packed: u32, size: u32, split: u16, crc: u32) {
    let start = out.len();
    put16(out, 0);
    out.push(0x74);
    put16(out, 0x8000 | split);
    put16(out, (32 + name.len()) as u16);
    put32(out, packed);
    put32(out, size);
    out.push(3);
    put32(out, crc);
    put32(out, ((DOS_DATE as u32) << 16) | DOS_TIME as u32);
    out.push(20);
    out.push(0x30);
    put16(out, name.len() as u16);
    put32(out, 0o100644);
    out.extend_from_slice(name.as_bytes());
    rar_fix_crc(out, start);
}

fn rar_end(out: &mut Vec<u8>, flags: u16) {
    let start = out.len();
    put16(out, 0);
    out.push(0x7B);
    put16(out, flags);
    put16(out, 7);
    rar_fix_crc(out, start);
}

/// A 7z archive holding `files`; names ending in '/' become directories.
pub fn seven_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut writer = zesven::Writer::create(Cursor::new(&mut bytes)).unwrap();
    for (name, data) in files {
        match name.strip_suffix('/') {
            Some(dir) => writer
                .add_directory(
                    zesven::ArchivePath::new(dir).unwrap(),
                    zesven::write::EntryMeta::directory(),
                )
                .unwrap(),
            None => writer
                .add_bytes(zesven::ArchivePath::new(name).unwrap(), data)
                .unwrap(),
        }
    }
    writer.finish().unwrap();
    bytes
}

/// Notifier that keeps every message it is handed.
#[derive(Clone, Default)]
pub struct Collected(Arc<Mutex<Vec<(Severity, String)>>>);

impl Collected {
    pub fn take(&self) -> Vec<(Severity, String)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl Notifier for Collected {
    fn notify(&self, severity: Severity, message: &str) {
        self.0.lock().unwrap().push((severity, message.to_string()));
    }
}

/// Split `data` into `parts` nearly equal pieces.
pub fn split(data: &[u8], parts: usize) -> Vec<Vec<u8>> {
    let step = data.len().div_ceil(parts);
    data.chunks(step).map(<[u8]>::to_vec).collect()
}

/// A virtual filesystem over an in-memory provider holding `files`.
pub fn memory_vfs(files: Vec<(&str, Vec<u8>)>) -> (Arc<MemoryProvider>, ArchiveVfs) {
    let mut provider = MemoryProvider::new().with_chunk_size(100);
    for (path, data) in files {
        provider.insert(path, data);
    }
    let provider = Arc::new(provider);
    let vfs = ArchiveVfs::new(provider.clone(), Config::default());
    (provider, vfs)
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
