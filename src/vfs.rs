//! Host-facing virtual filesystem over archives.
//!
//! Nothing here returns an error. Failures become the sentinels hosts expect:
//! `None` for a handle that could not be opened, `-1` for lengths, positions
//! and failed reads, an empty listing, or `false`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::diagnostics::{DiagnosticTranslator, Notifier, TracingNotifier};
use crate::io::{StreamProvider, Whence};
use crate::listing::{VirtualDirEntry, list_archive};
use crate::session::{ArchiveSession, open_engine};
use crate::url::{VirtualUrl, root_for};
use crate::volume::is_first_volume;

/// Result of probing a file for browsable contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerProbe {
    /// `archive://<encoded path>/`
    pub root: String,
    /// Every entry of the archive, flattened under `root`.
    pub entries: Vec<VirtualDirEntry>,
}

/// Archive-backed virtual filesystem.
pub struct ArchiveVfs {
    provider: Arc<dyn StreamProvider>,
    config: Config,
    translator: DiagnosticTranslator,
    notifier: Box<dyn Notifier>,
}

impl ArchiveVfs {
    pub fn new(provider: Arc<dyn StreamProvider>, config: Config) -> Self {
        Self {
            provider,
            config,
            translator: DiagnosticTranslator::default(),
            notifier: Box::new(TracingNotifier),
        }
    }

    pub fn with_translator(mut self, translator: DiagnosticTranslator) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open the entry a virtual URL points at.
    pub fn open(&self, url: &VirtualUrl) -> Option<ArchiveSession> {
        match ArchiveSession::open(
            self.provider.clone(),
            &self.config,
            &url.container,
            &url.inner,
        ) {
            Ok(session) => Some(session),
            Err(e) => {
                debug!(url = %url, "open failed: {e}");
                None
            }
        }
    }

    /// Read into `buf`. Returns the byte count, 0 at the end of the entry or
    /// without a session, and -1 on a decoding error.
    pub fn read(&self, session: Option<&mut ArchiveSession>, buf: &mut [u8]) -> i64 {
        let Some(session) = session else {
            return 0;
        };
        match session.read(buf) {
            Ok(n) => n as i64,
            Err(e) => {
                warn!(entry = %session.entry().path, "read failed: {e}");
                -1
            }
        }
    }

    /// Seek with a raw whence (0 = set, 1 = current, 2 = end).
    pub fn seek(&self, session: Option<&mut ArchiveSession>, offset: i64, whence: i32) -> i64 {
        let Some(session) = session else {
            return -1;
        };
        let Some(whence) = Whence::from_raw(whence) else {
            return -1;
        };
        match session.seek(offset, whence) {
            Ok(_) => session.position(),
            Err(e) => {
                debug!(entry = %session.entry().path, "seek failed: {e}");
                session.position()
            }
        }
    }

    pub fn get_length(&self, session: Option<&ArchiveSession>) -> i64 {
        session.map_or(-1, |s| s.length() as i64)
    }

    pub fn get_position(&self, session: Option<&ArchiveSession>) -> i64 {
        session.map_or(-1, ArchiveSession::position)
    }

    /// Release a session. Closing nothing succeeds.
    pub fn close(&self, session: Option<ArchiveSession>) -> bool {
        if let Some(session) = session {
            session.close();
        }
        true
    }

    /// Whether the virtual URL names an entry of its archive.
    pub fn exists(&self, url: &VirtualUrl) -> bool {
        let root = url.root();
        let target = url.path();
        self.list(&url.container, &root, "", true)
            .iter()
            .any(|entry| entry.path == target)
    }

    /// Direct children of the directory a virtual URL points at.
    pub fn get_directory(&self, url: &VirtualUrl) -> Vec<VirtualDirEntry> {
        self.list(&url.container, &url.directory_prefix(), &url.inner, false)
    }

    /// Probe whether `path` is an archive worth browsing.
    ///
    /// Later volumes of a split RAR set are never offered, so a set shows up
    /// once.
    pub fn contains_files(&self, path: &str) -> Option<ContainerProbe> {
        if !is_first_volume(path) {
            debug!(path, "not the first volume");
            return None;
        }
        let root = root_for(path);
        let entries = self.list(path, &root, "", true);
        if entries.is_empty() {
            return None;
        }
        Some(ContainerProbe { root, entries })
    }

    fn list(&self, container: &str, root: &str, subdir: &str, flat: bool) -> Vec<VirtualDirEntry> {
        let mut engine = match open_engine(self.provider.clone(), &self.config, container) {
            Ok((engine, _)) => engine,
            Err(e) => {
                debug!(container, "cannot list: {e}");
                return Vec::new();
            }
        };
        list_archive(
            engine.as_mut(),
            root,
            subdir,
            flat,
            &self.translator,
            self.notifier.as_ref(),
        )
    }
}
