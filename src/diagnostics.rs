//! Decoder diagnostics: translation of known engine messages and delivery to
//! a notification sink.

use std::borrow::Cow;
use std::collections::HashMap;

use tracing::{error, info, warn};

use crate::error::{EngineError, Severity, messages};

/// Known engine messages and the catalog id of their user-facing text.
const KNOWN_MESSAGES: &[(&str, u32)] = &[
    (messages::TRUNCATED, 30001),
    (messages::DAMAGED, 30002),
    (messages::BAD_CHECKSUM, 30003),
    (messages::BAD_SIGNATURE, 30004),
    (messages::CRC_MISMATCH, 30005),
    (messages::UNSUPPORTED_COMPRESSION, 30006),
    (messages::ENCRYPTED_ENTRY, 30007),
    (messages::NO_ENCRYPTION, 30008),
    (messages::UNRECOGNIZED_FORMAT, 30009),
    (messages::UNRECOGNIZED_FILTER, 30010),
    (messages::PREMATURE_END, 30011),
    (messages::BAD_CENTRAL_DIRECTORY, 30012),
    (messages::BAD_ZIP64, 30013),
    (messages::BAD_OCTAL, 30014),
    (messages::SIZE_OVERFLOW, 30015),
    (messages::SEEK_UNSUPPORTED, 30016),
    (messages::DECOMPRESSION_FAILED, 30017),
    (messages::MISSING_VOLUME, 30018),
];

/// Source of localized message templates.
pub trait MessageCatalog: Send + Sync {
    fn message(&self, id: u32) -> Option<Cow<'_, str>>;
}

/// Built-in English texts.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishCatalog;

impl MessageCatalog for EnglishCatalog {
    fn message(&self, id: u32) -> Option<Cow<'_, str>> {
        let text = match id {
            30001 => "The archive is truncated",
            30002 => "The archive is damaged",
            30003 => "An archive header is corrupt",
            30004 => "An archive header is corrupt",
            30005 => "A file in the archive failed its integrity check",
            30006 => "The archive uses an unsupported compression method",
            30007 => "Encrypted files cannot be opened",
            30008 => "Encrypted archives are not supported",
            30009 => "The file is not a supported archive",
            30010 => "The archive uses an unsupported compression filter",
            30011 => "The archive ended unexpectedly",
            30012 => "The archive directory is corrupt",
            30013 => "A large-file record in the archive is corrupt",
            30014 => "An archive header contains an invalid number",
            30015 => "A file size in the archive is invalid",
            30016 => "Seeking is not supported for this file",
            30017 => "A file in the archive could not be decompressed",
            30018 => "A volume of the archive is missing",
            _ => return None,
        };
        Some(Cow::Borrowed(text))
    }
}

/// Catalog backed by a map, for hosts that load their own strings.
#[derive(Debug, Default, Clone)]
pub struct MapCatalog(pub HashMap<u32, String>);

impl MessageCatalog for MapCatalog {
    fn message(&self, id: u32) -> Option<Cow<'_, str>> {
        self.0.get(&id).map(|s| Cow::Borrowed(s.as_str()))
    }
}

/// Maps known engine messages to catalog texts; anything else passes through.
pub struct DiagnosticTranslator {
    catalog: Box<dyn MessageCatalog>,
}

impl Default for DiagnosticTranslator {
    fn default() -> Self {
        Self::new(Box::new(EnglishCatalog))
    }
}

impl DiagnosticTranslator {
    pub fn new(catalog: Box<dyn MessageCatalog>) -> Self {
        Self { catalog }
    }

    /// Catalog id for a known engine message.
    pub fn message_id(raw: &str) -> Option<u32> {
        KNOWN_MESSAGES
            .iter()
            .find(|(text, _)| *text == raw)
            .map(|&(_, id)| id)
    }

    pub fn translate<'a>(&'a self, raw: &'a str) -> Cow<'a, str> {
        Self::message_id(raw)
            .and_then(|id| self.catalog.message(id))
            .unwrap_or(Cow::Borrowed(raw))
    }
}

/// Sink for user-facing diagnostics.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

/// Emits diagnostics as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Retry => info!("{message}"),
            Severity::Warn => warn!("{message}"),
            Severity::Failed | Severity::Fatal => error!("{message}"),
        }
    }
}

/// Prints diagnostics to stderr, the way the command-line tool reports.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        let label = match severity {
            Severity::Retry | Severity::Warn => "warning",
            Severity::Failed => "error",
            Severity::Fatal => "fatal error",
        };
        eprintln!("archivefs: {label}: {message}");
    }
}

/// Translate `err` and hand it to `notifier` at the engine's severity.
pub fn report(translator: &DiagnosticTranslator, notifier: &dyn Notifier, err: &EngineError) {
    notifier.notify(err.severity, &translator.translate(&err.message));
}
