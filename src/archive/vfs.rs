//! Synthetic filesystem: a [`std::io::Read`] + [`std::io::Seek`] adapter over
//! one archive volume's [`crate::model::SegmentSequence`], so that an
//! off-the-shelf RAR/7z central-directory reader can walk Usenet-backed
//! bytes exactly as if they were a local file.
//!
//! Seeks re-position transparently: a seek to a byte other than the current
//! read head drops any in-flight prefetch, so the next read starts a fresh
//! fetch at the new position (§4.5).

use std::io::{self, Read, Seek, SeekFrom};

use tokio::io::AsyncReadExt;

use crate::model::{SegmentSequence, sequence_byte_count};
use crate::provider::ArticleStreamProvider;
use crate::slicer::{self, ByteRange};

/// Bytes fetched ahead of the read head per cache refill, absent an explicit
/// override. 4 MiB is a reasonable default for archive header scanning.
const DEFAULT_PREFETCH_BYTES: u64 = 4 * 1024 * 1024;

/// A `Read + Seek` view over one volume's segment stream.
///
/// Reads are served synchronously by blocking a dedicated executor on the
/// provider's async body stream — this type is meant to be driven from
/// inside `tokio::task::spawn_blocking`, never from the async reactor
/// thread directly.
pub struct VolumeReader<'p, P: ArticleStreamProvider> {
    provider: &'p P,
    newsgroups: Vec<String>,
    segments: SegmentSequence,
    len: u64,
    pos: u64,
    prefetch_bytes: u64,
    cache_start: u64,
    cache: Vec<u8>,
}

impl<'p, P: ArticleStreamProvider> VolumeReader<'p, P> {
    #[must_use]
    pub fn new(provider: &'p P, newsgroups: Vec<String>, segments: SegmentSequence) -> Self {
        let len = sequence_byte_count(&segments);
        Self {
            provider,
            newsgroups,
            segments,
            len,
            pos: 0,
            prefetch_bytes: DEFAULT_PREFETCH_BYTES,
            cache_start: 0,
            cache: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_prefetch_bytes(mut self, bytes: u64) -> Self {
        self.prefetch_bytes = bytes.max(1);
        self
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn cache_covers(&self, pos: u64) -> bool {
        pos >= self.cache_start && pos < self.cache_start + self.cache.len() as u64
    }

    fn refill(&mut self, pos: u64) -> io::Result<()> {
        let window_end = (pos + self.prefetch_bytes).min(self.len);
        if pos >= window_end {
            self.cache_start = pos;
            self.cache.clear();
            return Ok(());
        }

        let target = ByteRange::new(pos, window_end - pos);
        let parts = slicer::slice(&self.segments, target);

        let mut buf = Vec::with_capacity((window_end - pos) as usize);
        futures::executor::block_on(async {
            for part in &parts {
                let mut stream = self
                    .provider
                    .body_reader(&part.message_id, &self.newsgroups)
                    .await
                    .map_err(|e| io::Error::other(e.to_string()))?;

                let byte_count = part.byte_count() as usize;
                let mut article_buf = vec![0u8; byte_count];
                stream.read_exact(&mut article_buf).await?;
                buf.extend_from_slice(&article_buf);
            }
            Ok::<(), io::Error>(())
        })?;

        self.cache_start = pos;
        self.cache = buf;
        Ok(())
    }
}

impl<P: ArticleStreamProvider> Read for VolumeReader<'_, P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        if !self.cache_covers(self.pos) {
            self.refill(self.pos)?;
        }
        if self.cache.is_empty() {
            return Ok(0);
        }

        let cache_offset = (self.pos - self.cache_start) as usize;
        let available = &self.cache[cache_offset..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<P: ArticleStreamProvider> Seek for VolumeReader<'_, P> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.len as i64 + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of volume"));
        }
        let new_pos = new_pos as u64;
        if !self.cache_covers(new_pos) {
            self.cache.clear();
        }
        self.pos = new_pos;
        Ok(self.pos)
    }
}
