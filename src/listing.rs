//! Directory views synthesized from an archive's flat entry names.
//!
//! Archives store one record per file, usually without records for the
//! folders in between. [`PathTreeLister`] turns that stream into the children
//! of one virtual directory in a single pass: the first entry below a folder
//! stands in for the folder and later entries under it are suppressed.
//!
//! In flat mode every entry below the filter is emitted with its full
//! relative path, which is how callers probe whether a path exists anywhere
//! in the archive.

use std::collections::HashSet;

use tracing::debug;

use crate::diagnostics::{DiagnosticTranslator, Notifier, report};
use crate::engine::{DecodingEngine, EntryMetadata};

/// Cap on back-to-back retry statuses from the engine while listing.
const MAX_CONSECUTIVE_RETRIES: usize = 64;

/// One item of a virtual directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDirEntry {
    pub label: String,
    /// Full virtual path; folders end with `/`.
    pub path: String,
    pub is_folder: bool,
    pub size: u64,
    pub mtime: i64,
}

/// Single-pass lister over entry records in archive order.
#[derive(Debug)]
pub struct PathTreeLister {
    root: String,
    filter: Vec<String>,
    flat: bool,
    folders: HashSet<String>,
    entries: Vec<VirtualDirEntry>,
}

impl PathTreeLister {
    /// `root` is prefixed onto every produced path and is expected to end
    /// with `/`. `subdir` selects whose direct children are listed; empty
    /// means the archive root.
    pub fn new(root: impl Into<String>, subdir: &str, flat: bool) -> Self {
        Self {
            root: root.into(),
            filter: subdir
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            flat,
            folders: HashSet::new(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: &EntryMetadata) {
        let is_dir_record = entry.path.ends_with('/');
        let segments: Vec<&str> = entry.path.trim_end_matches('/').split('/').collect();
        let depth = self.filter.len();

        if segments.len() <= depth {
            return;
        }
        if !self.flat && !self.filter.iter().zip(&segments).all(|(f, s)| f == s) {
            return;
        }

        let child = segments[depth];
        let is_folder = segments.len() > depth + 1 || is_dir_record;

        if self.flat {
            let relative = segments[depth..].join("/");
            let mut path = format!("{}{}", self.root, relative);
            if is_dir_record {
                path.push('/');
            }
            self.entries.push(VirtualDirEntry {
                label: relative,
                path,
                is_folder: is_dir_record,
                size: entry.size,
                mtime: entry.mtime,
            });
            return;
        }

        if is_folder {
            if !self.folders.insert(child.to_string()) {
                return;
            }
            // A folder standing in for a deeper file carries no metadata of its own.
            let (size, mtime) = if segments.len() > depth + 1 {
                (0, 0)
            } else {
                (entry.size, entry.mtime)
            };
            self.entries.push(VirtualDirEntry {
                label: child.to_string(),
                path: format!("{}{}/", self.root, child),
                is_folder: true,
                size,
                mtime,
            });
        } else {
            self.entries.push(VirtualDirEntry {
                label: child.to_string(),
                path: format!("{}{}", self.root, child),
                is_folder: false,
                size: entry.size,
                mtime: entry.mtime,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> Vec<VirtualDirEntry> {
        self.entries
    }
}

/// List a sequence of records without a live engine.
pub fn list_records<'a>(
    records: impl IntoIterator<Item = &'a EntryMetadata>,
    root: &str,
    subdir: &str,
    flat: bool,
) -> Vec<VirtualDirEntry> {
    let mut lister = PathTreeLister::new(root, subdir, flat);
    for record in records {
        lister.push(record);
    }
    lister.finish()
}

/// Drive `engine` to the end of the archive, listing as it goes.
///
/// A decode error stops the walk; it is reported through `notifier` and the
/// entries gathered so far are returned.
pub fn list_archive(
    engine: &mut dyn DecodingEngine,
    root: &str,
    subdir: &str,
    flat: bool,
    translator: &DiagnosticTranslator,
    notifier: &dyn Notifier,
) -> Vec<VirtualDirEntry> {
    let mut lister = PathTreeLister::new(root, subdir, flat);
    let mut retries = 0;

    loop {
        let entry = match engine.next_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) if e.is_retry() && retries < MAX_CONSECUTIVE_RETRIES => {
                retries += 1;
                continue;
            }
            Err(e) => {
                report(translator, notifier, &e);
                break;
            }
        };
        retries = 0;
        lister.push(&entry);

        if let Err(e) = engine.skip_data() {
            report(translator, notifier, &e);
            break;
        }
    }

    debug!(
        format = engine.format_name(),
        count = lister.len(),
        "listed {root}{subdir}"
    );
    lister.finish()
}
