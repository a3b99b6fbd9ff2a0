use std::time::Duration;

/// Read size used when a stream does not report a preferred chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 10240;

/// Runtime settings shared by providers and sessions.
#[derive(Debug, Clone)]
pub struct Config {
    /// Byte-source buffer size when the provider reports none.
    pub default_chunk_size: usize,
    /// Per-request timeout for HTTP sources.
    pub http_timeout: Duration,
    /// Attempts before an HTTP range read gives up on connection errors.
    pub http_max_retry: u32,
    /// Preferred chunk size reported by HTTP streams.
    pub http_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            http_timeout: Duration::from_secs(30),
            http_max_retry: 10,
            http_chunk_size: 256 * 1024,
        }
    }
}
