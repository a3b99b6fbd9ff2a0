//! RAR decoding backed by the `unrar` library.
//!
//! The library only opens archives by path and walks a volume set itself,
//! following the naming convention of the first volume. Volumes that are
//! not plain local files are copied into a spool directory under their own
//! names first. Headers are walked once at open; reading an entry replays
//! the walk up to it and extracts it into the spool.

use std::fmt::Display;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use tempfile::TempDir;
use tracing::debug;

use super::{ArchiveInput, DecodingEngine, EntryMetadata, dos_to_unix, seek_target};
use crate::error::{EngineError, messages};
use crate::io::Whence;
use crate::source::VolumeChain;

fn rar_error(e: impl Display) -> EngineError {
    let text = e.to_string();
    debug!(error = %text, "unrar reported an error");
    let lower = text.to_ascii_lowercase();
    let message = if lower.contains("volume") {
        messages::MISSING_VOLUME
    } else if lower.contains("password") || lower.contains("encrypt") {
        messages::NO_ENCRYPTION
    } else if lower.contains("crc") || lower.contains("checksum") {
        messages::CRC_MISMATCH
    } else {
        messages::DAMAGED
    };
    EngineError::fatal(message)
}

/// Name a spooled volume after the last segment of its source path.
fn volume_name(path: &str, index: usize) -> String {
    match path.rsplit(['/', '\\']).next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("volume{index}.rar"),
    }
}

struct RarEntry {
    metadata: EntryMetadata,
    is_file: bool,
    encrypted: bool,
}

struct Current {
    index: usize,
    /// Extracted on first read or seek.
    file: Option<File>,
    pos: u64,
}

/// RAR decoder over a set of volume files.
pub struct RarEngine {
    first_volume: PathBuf,
    spool: TempDir,
    entries: Vec<RarEntry>,
    /// Error that cut the header walk short; raised after the last entry.
    trailing_error: Option<EngineError>,
    next: usize,
    current: Option<Current>,
}

impl RarEngine {
    /// Open the volumes of `chain`, starting at its first.
    pub fn from_chain(mut chain: VolumeChain) -> Result<Self, EngineError> {
        let spool = spool_dir()?;
        let first_volume = match chain.local_paths() {
            Some(paths) => paths.into_iter().next(),
            None => {
                let mut first = None;
                for index in 0..chain.volume_count() {
                    let name = volume_name(chain.volumes()[index].path(), index);
                    let path = spool.path().join(name);
                    let mut file = File::create(&path)?;
                    let copied = chain.copy_volume(index, &mut file)?;
                    debug!(volume = index, bytes = copied, "Spooled RAR volume");
                    first.get_or_insert(path);
                }
                first
            }
        };
        let Some(first_volume) = first_volume else {
            return Err(EngineError::fatal(messages::MISSING_VOLUME));
        };
        Self::open(first_volume, spool)
    }

    /// Open a RAR archive held in a single stream.
    pub fn from_input(input: &mut dyn ArchiveInput) -> Result<Self, EngineError> {
        let spool = spool_dir()?;
        let path = spool.path().join("archive.rar");
        let mut file = File::create(&path)?;
        input.seek(SeekFrom::Start(0))?;
        std::io::copy(input, &mut file)?;
        Self::open(path, spool)
    }

    fn open(first_volume: PathBuf, spool: TempDir) -> Result<Self, EngineError> {
        let archive = unrar::Archive::new(&first_volume)
            .open_for_processing()
            .map_err(rar_error)?;

        let mut entries: Vec<RarEntry> = Vec::new();
        let mut trailing_error = None;
        let mut cursor = Some(archive);
        while let Some(archive) = cursor.take() {
            match archive.read_header() {
                Ok(Some(entry)) => {
                    let header = entry.entry();
                    let mut path = header.filename.to_string_lossy().replace('\\', "/");
                    // A file split across volumes shows up once per volume
                    let repeated = entries
                        .last()
                        .is_some_and(|last| last.metadata.path.trim_end_matches('/') == path);
                    if !repeated {
                        let is_file = header.is_file();
                        if header.is_directory() && !path.ends_with('/') {
                            path.push('/');
                        }
                        let date = (header.file_time >> 16) as u16;
                        let time = header.file_time as u16;
                        entries.push(RarEntry {
                            metadata: EntryMetadata {
                                path,
                                size: if is_file { header.unpacked_size } else { 0 },
                                mtime: dos_to_unix(date, time),
                            },
                            is_file,
                            encrypted: header.is_encrypted(),
                        });
                    }
                    match entry.skip() {
                        Ok(next) => cursor = Some(next),
                        Err(e) => trailing_error = Some(rar_error(e)),
                    }
                }
                Ok(None) => {}
                Err(e) => trailing_error = Some(rar_error(e)),
            }
        }

        debug!(
            entries = entries.len(),
            volume = %first_volume.display(),
            "Opened RAR archive"
        );
        Ok(Self {
            first_volume,
            spool,
            entries,
            trailing_error,
            next: 0,
            current: None,
        })
    }

    /// Replay the header walk up to entry `index` and extract it.
    fn extract(&self, index: usize) -> Result<File, EngineError> {
        let target = self.spool.path().join(format!("entry-{index}"));
        let mut cursor = Some(
            unrar::Archive::new(&self.first_volume)
                .open_for_processing()
                .map_err(rar_error)?,
        );
        let mut seen: Option<usize> = None;
        let mut last_name = String::new();

        while let Some(archive) = cursor.take() {
            let Some(entry) = archive.read_header().map_err(rar_error)? else {
                break;
            };
            let name = entry.entry().filename.to_string_lossy().replace('\\', "/");
            if seen.is_none() || name != last_name {
                seen = Some(seen.map_or(0, |n| n + 1));
                last_name = name;
            }
            if seen == Some(index) {
                entry.extract_to(&target).map_err(rar_error)?;
                return Ok(File::open(&target)?);
            }
            cursor = Some(entry.skip().map_err(rar_error)?);
        }
        Err(EngineError::fatal(messages::DAMAGED))
    }

    /// Extract the current entry if needed; returns the data size.
    fn prepare(&mut self) -> Result<u64, EngineError> {
        let Some(current) = self.current.as_ref() else {
            return Err(EngineError::failed("No current entry"));
        };
        let entry = &self.entries[current.index];
        if entry.encrypted {
            return Err(EngineError::failed(messages::ENCRYPTED_ENTRY));
        }
        let size = entry.metadata.size;
        if !entry.is_file || size == 0 || current.file.is_some() {
            return Ok(size);
        }
        let file = self.extract(current.index)?;
        if let Some(current) = self.current.as_mut() {
            current.file = Some(file);
        }
        Ok(size)
    }
}

fn spool_dir() -> Result<TempDir, EngineError> {
    Ok(tempfile::Builder::new().prefix("archivefs-rar").tempdir()?)
}

impl DecodingEngine for RarEngine {
    fn format_name(&self) -> &'static str {
        "rar"
    }

    fn next_entry(&mut self) -> Result<Option<EntryMetadata>, EngineError> {
        self.current = None;
        let Some(entry) = self.entries.get(self.next) else {
            return match self.trailing_error.take() {
                Some(e) => Err(e),
                None => Ok(None),
            };
        };
        let metadata = entry.metadata.clone();
        self.current = Some(Current {
            index: self.next,
            file: None,
            pos: 0,
        });
        self.next += 1;
        Ok(Some(metadata))
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.prepare()?;
        let Some(Current {
            file: Some(file),
            pos,
            ..
        }) = self.current.as_mut()
        else {
            return Ok(0);
        };
        let want = size.saturating_sub(*pos).min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want])?;
        *pos += n as u64;
        Ok(n)
    }

    fn skip_data(&mut self) -> Result<(), EngineError> {
        self.current = None;
        Ok(())
    }

    fn seek_data(&mut self, offset: i64, whence: Whence) -> Result<u64, EngineError> {
        let size = self.prepare()?;
        let Some(Current {
            file: Some(file),
            pos,
            ..
        }) = self.current.as_mut()
        else {
            return seek_target(offset, whence, 0, Some(0));
        };
        let target = seek_target(offset, whence, *pos, Some(size))?;
        file.seek(SeekFrom::Start(target))?;
        *pos = target;
        Ok(target)
    }
}
