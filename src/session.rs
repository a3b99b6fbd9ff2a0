//! One open archive positioned at one entry.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{self, DecodingEngine, EntryMetadata};
use crate::error::{Error, Result};
use crate::io::{StreamProvider, Whence};
use crate::source::{ByteSourceAdapter, VolumeChain};
use crate::volume::{self, VolumeSet};

/// Back-to-back retry statuses tolerated while searching for an entry.
const MAX_HEADER_RETRIES: usize = 64;

/// Resolve the volumes of `container` and open a decoding engine over them.
///
/// The engine owns the volume chain, so dropping it releases every stream.
pub fn open_engine(
    provider: Arc<dyn StreamProvider>,
    config: &Config,
    container: &str,
) -> Result<(Box<dyn DecodingEngine>, VolumeSet)> {
    let volumes = volume::resolve(provider.as_ref(), container);
    let adapter = ByteSourceAdapter::new(provider, config.default_chunk_size);
    let chain = VolumeChain::open(adapter, &volumes)?;
    let engine = engine::open_volumes(chain)?;
    debug!(
        container,
        format = engine.format_name(),
        volumes = volumes.len(),
        "opened archive"
    );
    Ok((engine, volumes))
}

/// A decoding engine positioned at a selected entry, with a running read
/// offset.
pub struct ArchiveSession {
    engine: Box<dyn DecodingEngine>,
    volumes: VolumeSet,
    entry: EntryMetadata,
    position: i64,
}

impl ArchiveSession {
    /// Open `container` and walk its entries until one is named exactly
    /// `entry_name`. The entry's data is left unread.
    pub fn open(
        provider: Arc<dyn StreamProvider>,
        config: &Config,
        container: &str,
        entry_name: &str,
    ) -> Result<Self> {
        let (mut engine, volumes) = open_engine(provider, config, container)?;
        let mut retries = 0;

        loop {
            match engine.next_entry() {
                Ok(Some(entry)) if entry.path == entry_name => {
                    debug!(container, entry = entry_name, size = entry.size, "entry found");
                    return Ok(Self {
                        engine,
                        volumes,
                        entry,
                        position: 0,
                    });
                }
                Ok(Some(_)) => {
                    retries = 0;
                    engine.skip_data()?;
                }
                Ok(None) => break,
                Err(e) if e.is_retry() && retries < MAX_HEADER_RETRIES => retries += 1,
                Err(e) => {
                    info!(container, "stopped looking for {entry_name}: {e}");
                    break;
                }
            }
        }

        Err(Error::EntryNotFound(entry_name.to_string()))
    }

    /// Read decoded bytes of the entry; zero at its end.
    ///
    /// A retry status from the engine is retried once before it is returned.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self.engine.read_data(buf) {
            Err(e) if e.is_retry() => self.engine.read_data(buf)?,
            other => other?,
        };
        self.position += n as i64;
        Ok(n)
    }

    /// Reposition within the entry. On failure the tracked position becomes
    /// -1 until the next successful seek.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        match self.engine.seek_data(offset, whence) {
            Ok(pos) => {
                self.position = pos as i64;
                Ok(pos)
            }
            Err(e) => {
                self.position = -1;
                Err(e.into())
            }
        }
    }

    /// Declared uncompressed size of the entry.
    pub fn length(&self) -> u64 {
        self.entry.size
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn entry(&self) -> &EntryMetadata {
        &self.entry
    }

    pub fn volumes(&self) -> &VolumeSet {
        &self.volumes
    }

    pub fn format_name(&self) -> &'static str {
        self.engine.format_name()
    }

    /// Release the engine and every byte source.
    pub fn close(self) {
        debug!(entry = %self.entry.path, "closing session");
    }
}
