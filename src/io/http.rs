use reqwest::blocking::Client;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{SourceStream, StreamProvider};
use crate::config::Config;
use anyhow::{Result, anyhow, bail};
use tracing::warn;

/// HTTP provider serving streams through Range requests
pub struct HttpProvider {
    client: Client,
    transferred_bytes: Arc<AtomicU64>,
    max_retry: u32,
    chunk_size: usize,
}

impl HttpProvider {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            client,
            transferred_bytes: Arc::new(AtomicU64::new(0)),
            max_retry: config.http_max_retry,
            chunk_size: config.http_chunk_size,
        })
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

impl StreamProvider for HttpProvider {
    /// Sends a HEAD request to verify Range support and get the file size
    fn open(&self, url: &str) -> Result<Box<dyn SourceStream>> {
        let resp = self.client.head(url).send()?;

        if !resp.status().is_success() {
            bail!("HTTP request failed with status: {}", resp.status());
        }

        // Check if server supports Range requests
        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");

        if !accept_ranges.contains("bytes") {
            bail!("Remote server does not support Range requests");
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("Remote server did not return Content-Length"))?;

        Ok(Box::new(HttpStream {
            client: self.client.clone(),
            url: url.to_string(),
            size,
            pos: 0,
            transferred_bytes: self.transferred_bytes.clone(),
            max_retry: self.max_retry,
            chunk_size: self.chunk_size,
        }))
    }

    fn exists(&self, url: &str) -> bool {
        self.client
            .head(url)
            .send()
            .map(|resp| resp.status().is_success())
            .unwrap_or(false)
    }

    fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        bail!("Directory listing is not available over HTTP: {dir}")
    }
}

/// A remote file read through HTTP Range requests
pub struct HttpStream {
    client: Client,
    url: String,
    size: u64,
    pos: u64,
    transferred_bytes: Arc<AtomicU64>,
    max_retry: u32,
    chunk_size: usize,
}

impl HttpStream {
    fn read_range(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = offset + buf.len() as u64 - 1;
        let end = end.min(self.size - 1);
        let expected_size = (end - offset + 1) as usize;

        let mut received = 0;
        let mut retry_count = 0;

        while received < expected_size {
            let current_start = offset + received as u64;
            let range = format!("bytes={}-{}", current_start, end);

            match self.client.get(&self.url).header("Range", &range).send() {
                Ok(resp) => {
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        bail!("HTTP request failed with status: {}", resp.status());
                    }

                    let bytes = resp.bytes()?;
                    if bytes.is_empty() {
                        break;
                    }
                    let chunk_len = bytes.len().min(expected_size - received);
                    buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
                    received += chunk_len;

                    self.transferred_bytes
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        bail!("Max retries exceeded");
                    }
                    warn!(
                        url = %self.url,
                        "connection error, retry {}/{}: {}",
                        retry_count,
                        self.max_retry,
                        e
                    );
                    std::thread::sleep(Duration::from_millis(500 * retry_count as u64));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(received)
    }
}

impl Read for HttpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_range(self.pos, buf).map_err(io::Error::other)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for HttpStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        self.pos = target;
        Ok(target)
    }
}

impl SourceStream for HttpStream {
    fn chunk_size(&self) -> Option<usize> {
        Some(self.chunk_size)
    }
}
