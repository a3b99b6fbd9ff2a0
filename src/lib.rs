//! # archivefs
//!
//! Browse archives as if they were directories.
//!
//! An archive path is wrapped into an `archive://` virtual URL whose first
//! segment is the percent-encoded path of the archive and whose remainder
//! names an entry inside it. [`ArchiveVfs`] lists virtual directories and
//! opens entries for reading and seeking without extracting anything to disk.
//!
//! ## Features
//!
//! - Archives on the local filesystem or behind HTTP/HTTPS URLs (Range
//!   requests), through the pluggable [`StreamProvider`]
//! - Multi-volume RAR naming (`name.partN.rar`, `name.rar` + `name.rNN`)
//!   resolved into one continuous byte stream
//! - ZIP, TAR, 7z and RAR engines, with gzip-compressed TAR support
//! - One-level directory listings synthesized from flat entry names, and
//!   flattened listings for probing
//!
//! ## Example
//!
//! ```no_run
//! use archivefs::{ArchiveVfs, Config, DefaultProvider, VirtualUrl};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let vfs = ArchiveVfs::new(DefaultProvider::shared(&config)?, config);
//!
//!     let url = VirtualUrl::new("/srv/media/show.zip", "");
//!     for entry in vfs.get_directory(&url) {
//!         println!("{}", entry.path);
//!     }
//!
//!     let url = VirtualUrl::new("/srv/media/show.zip", "season1/episode1.txt");
//!     if let Some(mut session) = vfs.open(&url) {
//!         let mut buf = vec![0u8; 4096];
//!         let n = vfs.read(Some(&mut session), &mut buf);
//!         println!("read {n} of {} bytes", vfs.get_length(Some(&session)));
//!         vfs.close(Some(session));
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod io;
pub mod listing;
pub mod session;
pub mod source;
pub mod url;
pub mod vfs;
pub mod volume;

pub use cli::Cli;
pub use config::Config;
pub use diagnostics::{DiagnosticTranslator, MessageCatalog, Notifier};
pub use engine::{DecodingEngine, EntryMetadata};
pub use error::{EngineError, Error, Result, Severity};
pub use io::{DefaultProvider, LocalProvider, MemoryProvider, StreamProvider, Whence};
pub use listing::VirtualDirEntry;
pub use session::ArchiveSession;
pub use url::{VirtualUrl, encode_segment};
pub use vfs::{ArchiveVfs, ContainerProbe};
pub use volume::VolumeSet;
