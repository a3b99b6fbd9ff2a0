//! `archive://` virtual URLs.
//!
//! A virtual URL glues two addresses together: the path of the archive
//! itself, percent-encoded into the host position, and the path of an entry
//! inside it:
//!
//! ```text
//! archive://%2Fsrv%2Fmedia%2Fshow.rar/season1/episode1.mkv
//! ```

use std::fmt;

use crate::error::Error;

pub const SCHEME: &str = "archive://";

/// Percent-encode every byte except alphanumerics and `- . _ ! ( )`.
pub fn encode_segment(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 2);
    for &byte in input.as_bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'!' | b'(' | b')') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Undo `%XX` escapes; malformed escapes are kept literally.
fn decode_segment(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// A parsed `archive://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualUrl {
    /// Path of the archive (first volume for split sets).
    pub container: String,
    /// Slash-delimited entry path inside the archive; empty for the root.
    pub inner: String,
    /// Anything after `?`, without the `?`.
    pub query: String,
}

impl VirtualUrl {
    pub fn new(container: impl Into<String>, inner: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            inner: inner.into(),
            query: String::new(),
        }
    }

    pub fn parse(url: &str) -> Result<Self, Error> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, query.to_string()),
            None => (rest, String::new()),
        };
        let (host, inner) = rest.split_once('/').unwrap_or((rest, ""));
        if host.is_empty() {
            return Err(Error::InvalidUrl(url.to_string()));
        }
        Ok(Self {
            container: decode_segment(host),
            inner: inner.to_string(),
            query,
        })
    }

    /// `archive://<encoded container>/`
    pub fn root(&self) -> String {
        root_for(&self.container)
    }

    /// The URL without its query, guaranteed to end with `/` so child names
    /// can be appended directly.
    pub fn directory_prefix(&self) -> String {
        let mut prefix = self.root();
        prefix.push_str(&self.inner);
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        prefix
    }

    /// The URL without its query.
    pub fn path(&self) -> String {
        format!("{}{}", self.root(), self.inner)
    }
}

/// Root virtual path for an archive at `container`.
pub fn root_for(container: &str) -> String {
    format!("{SCHEME}{}/", encode_segment(container))
}

impl fmt::Display for VirtualUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        Ok(())
    }
}
