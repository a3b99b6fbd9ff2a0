use flate2::read::MultiGzDecoder;
use std::io::{self, Read, Seek, SeekFrom};

use super::ArchiveInput;

const DISCARD_CHUNK: usize = 8192;

/// Seekable view of a gzip-compressed input.
///
/// Forward seeks decode and discard; backward seeks restart decoding from the
/// beginning of the compressed input. Seeking relative to the end is not
/// possible because the decoded length is unknown.
pub struct GzipFilter {
    decoder: Option<MultiGzDecoder<Box<dyn ArchiveInput>>>,
    pos: u64,
}

impl GzipFilter {
    pub fn new(input: Box<dyn ArchiveInput>) -> Self {
        Self {
            decoder: Some(MultiGzDecoder::new(input)),
            pos: 0,
        }
    }

    fn decoder(&mut self) -> io::Result<&mut MultiGzDecoder<Box<dyn ArchiveInput>>> {
        self.decoder
            .as_mut()
            .ok_or_else(|| io::Error::other("gzip filter lost its input"))
    }

    fn restart(&mut self) -> io::Result<()> {
        let Some(decoder) = self.decoder.take() else {
            return Err(io::Error::other("gzip filter lost its input"));
        };
        let mut input = decoder.into_inner();
        input.seek(SeekFrom::Start(0))?;
        self.decoder = Some(MultiGzDecoder::new(input));
        self.pos = 0;
        Ok(())
    }

    fn discard(&mut self, mut count: u64) -> io::Result<()> {
        let mut scratch = [0u8; DISCARD_CHUNK];
        while count > 0 {
            let want = count.min(DISCARD_CHUNK as u64) as usize;
            let n = self.read(&mut scratch[..want])?;
            if n == 0 {
                break;
            }
            count -= n as u64;
        }
        Ok(())
    }
}

impl Read for GzipFilter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.decoder()?.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for GzipFilter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
            })?,
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "cannot seek from the end of a gzip stream",
                ));
            }
        };
        if target < self.pos {
            self.restart()?;
        }
        self.discard(target - self.pos)?;
        Ok(self.pos)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}
