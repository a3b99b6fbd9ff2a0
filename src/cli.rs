use clap::Parser;
use std::time::Duration;

use crate::config::{Config, DEFAULT_CHUNK_SIZE};
use crate::url::{SCHEME, VirtualUrl};

#[derive(Parser, Debug)]
#[command(name = "archivefs")]
#[command(version)]
#[command(about = "Browse archives as virtual directories", long_about = None)]
#[command(after_help = "Examples:\n  \
  archivefs -l media.zip docs          list the docs/ folder of media.zip\n  \
  archivefs -p show.part1.rar ep1.mkv | mpv -   stream an entry of a split RAR\n  \
  archivefs -r https://example.com/a.tar.gz    probe a remote archive\n  \
  archivefs -e 'archive://a.zip/readme.txt'    check whether an entry exists")]
pub struct Cli {
    /// Archive path, HTTP URL or archive:// URL
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Entry or folder inside the archive
    #[arg(value_name = "ENTRY")]
    pub entry: Option<String>,

    /// List one folder level (default when no entry is piped)
    #[arg(short = 'l')]
    pub list: bool,

    /// List every entry, flattened, the way container probing does
    #[arg(short = 'r')]
    pub recursive: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Write the entry's contents to stdout
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Seek to OFFSET before piping (negative counts from the end)
    #[arg(short = 'o', value_name = "OFFSET", allow_negative_numbers = true)]
    pub offset: Option<i64>,

    /// Only report whether the entry exists (exit status 1 when it does not)
    #[arg(short = 'e')]
    pub exists: bool,

    /// Quiet mode
    #[arg(short = 'q')]
    pub quiet: bool,

    /// Log decoder activity to stderr
    #[arg(long)]
    pub debug: bool,

    /// Read size when the source reports none
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// HTTP request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet || self.pipe
    }

    pub fn is_http_url(&self) -> bool {
        crate::io::is_http_url(&self.url().container)
    }

    /// The target and entry combined into a virtual URL.
    ///
    /// An `archive://` target carries its own entry path; a separate ENTRY
    /// argument then replaces it.
    pub fn url(&self) -> VirtualUrl {
        let mut url = if self.target.starts_with(SCHEME) {
            VirtualUrl::parse(&self.target).unwrap_or_else(|_| VirtualUrl::new(&self.target, ""))
        } else {
            VirtualUrl::new(&self.target, "")
        };
        if let Some(entry) = &self.entry {
            url.inner = entry.clone();
        }
        url
    }

    pub fn config(&self) -> Config {
        Config {
            default_chunk_size: self.chunk_size.max(1),
            http_timeout: Duration::from_secs(self.timeout),
            ..Config::default()
        }
    }
}
