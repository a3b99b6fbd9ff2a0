//! Multi-volume RAR detection.
//!
//! Two naming conventions are recognised:
//!
//! - `name.partNNN.rar` for every volume;
//! - `name.rar` followed by `name.r00`, `name.r01`, ... where the `.rar` file
//!   is the first volume even though it sorts after the numbered ones.
//!
//! Any other path is a single-volume archive.

use tracing::{debug, warn};

use crate::io::StreamProvider;

/// The ordered physical files making up one logical archive stream.
///
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSet {
    paths: Vec<String>,
    legacy: bool,
}

impl VolumeSet {
    pub fn single(path: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            legacy: false,
        }
    }

    /// Volume set in exactly the given order; `None` when `paths` is empty.
    pub fn from_paths(paths: Vec<String>) -> Option<Self> {
        if paths.is_empty() {
            return None;
        }
        Some(Self {
            paths,
            legacy: false,
        })
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn first(&self) -> &str {
        &self.paths[0]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether the `.rar` + `.rNN` convention was detected.
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }
}

/// Resolve the volumes that make up the archive at `path`.
///
/// Candidates are ordered by plain string comparison of their full paths.
/// This misorders `part10` before `part2` when part numbers are not
/// zero-padded; the behaviour is kept as is until numeric ordering is
/// confirmed to be wanted.
pub fn resolve(provider: &dyn StreamProvider, path: &str) -> VolumeSet {
    let (dir, name, sep) = split_path(path);
    if !has_rar_extension(name) {
        return VolumeSet::single(path);
    }

    let (base, legacy) = if let Some(stem_end) = part_marker(name) {
        let cut = path.len() - name.len() + stem_end + ".part".len();
        (&path[..cut], false)
    } else {
        let probe = format!("{}00", &path[..path.len() - 2]);
        if !provider.exists(&probe) {
            return VolumeSet::single(path);
        }
        (&path[..path.len() - "rar".len()], true)
    };

    let names = match provider.list_dir(dir) {
        Ok(names) => names,
        Err(e) => {
            warn!(path, "cannot list sibling volumes: {e:#}");
            return VolumeSet::single(path);
        }
    };

    let mut paths: Vec<String> = names
        .iter()
        .filter(|name| is_volume_name(name))
        .map(|name| join(dir, name, sep))
        .filter(|candidate| candidate.contains(base))
        .collect();

    if paths.is_empty() {
        return VolumeSet::single(path);
    }

    paths.sort();
    if legacy {
        paths.rotate_right(1);
    }

    debug!(path, volumes = paths.len(), legacy, "resolved volume set");
    VolumeSet { paths, legacy }
}

/// Whether `path` may be offered as an archive on its own.
///
/// Only the first volume of a split RAR set qualifies: `.partN.rar` with
/// `N == 1`, or the `.rar` file of a `.rNN` set. Numbered `.rNN` files never
/// do.
pub fn is_first_volume(path: &str) -> bool {
    let (_, name, _) = split_path(path);
    if let Some(ext) = extension(name) {
        if ext.len() > 1
            && ext.as_bytes()[0].eq_ignore_ascii_case(&b'r')
            && ext[1..].bytes().all(|b| b.is_ascii_digit())
        {
            return false;
        }
    }
    match part_marker(name) {
        Some(stem_end) => {
            let digits = &name[stem_end + ".part".len()..name.len() - ".rar".len()];
            digits.parse::<u64>().map(|n| n == 1).unwrap_or(false)
        }
        None => true,
    }
}

fn split_path(path: &str) -> (&str, &str, char) {
    match path.rfind(['/', '\\']) {
        Some(idx) => {
            let sep = if path.as_bytes()[idx] == b'\\' { '\\' } else { '/' };
            (&path[..idx], &path[idx + 1..], sep)
        }
        None => ("", path, '/'),
    }
}

fn join(dir: &str, name: &str, sep: char) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}{sep}{name}")
    }
}

fn extension(name: &str) -> Option<&str> {
    name.rfind('.').map(|idx| &name[idx + 1..])
}

fn has_rar_extension(name: &str) -> bool {
    extension(name).is_some_and(|ext| ext.eq_ignore_ascii_case("rar"))
}

/// `*.r(ar|[0-9]+)`
fn is_volume_name(name: &str) -> bool {
    match extension(name) {
        Some(ext) if ext.len() > 1 && ext.as_bytes()[0].eq_ignore_ascii_case(&b'r') => {
            let rest = &ext[1..];
            rest.eq_ignore_ascii_case("ar") || rest.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}

/// Byte index of `.part` in a `*.partNNN.rar` file name.
fn part_marker(name: &str) -> Option<usize> {
    if !has_rar_extension(name) {
        return None;
    }
    let stem = &name[..name.len() - ".rar".len()];
    let idx = stem.rfind(".part")?;
    let digits = &stem[idx + ".part".len()..];
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(idx)
}
